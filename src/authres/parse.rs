//-
// Copyright (c) 2024, the arcfilter authors
//
// This file is part of arcfilter.
//
// arcfilter is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// arcfilter is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// arcfilter. If not, see <http://www.gnu.org/licenses/>.

use super::lex::{tokenise, Token};
use super::{AuthResult, MalformedHeader, Property, KNOWN_METHODS, KNOWN_PTYPES};

/// A successfully parsed `Authentication-Results` value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedHeader {
    pub authserv_id: String,
    pub results: Vec<ResInfo>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResInfo {
    Result(AuthResult),
    /// A well-formed result for a method we don't know about.
    Unrecognized(String),
}

/// One piece of a `resinfo`, in the order they occur.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Component {
    Method {
        name: String,
        version: Option<u32>,
        result: String,
        comment: Option<String>,
    },
    Reason(String),
    Property(Property),
    Unrecognized(String),
}

struct Cursor<'t, 'a> {
    tokens: &'t [Token<'a>],
    pos: usize,
}

impl<'t, 'a> Cursor<'t, 'a> {
    fn peek(&self) -> Option<&'t Token<'a>> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<&'t Token<'a>> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Skips any whitespace and comments, returning the first comment.
    fn cfws(&mut self) -> Option<&'t str> {
        let mut first = None;
        while let Some(token) = self.peek() {
            match *token {
                Token::Space => {},
                Token::Comment(ref c) => {
                    if first.is_none() {
                        first = Some(c.as_str());
                    }
                },
                _ => break,
            }
            self.pos += 1;
        }
        first
    }

    fn peek_special(&self, ch: char) -> bool {
        matches!(self.peek(), Some(&Token::Special(c)) if c == ch)
    }

    fn special(&mut self, ch: char) -> Result<(), MalformedHeader> {
        match self.bump() {
            Some(&Token::Special(c)) if c == ch => Ok(()),
            other => Err(unexpected(&format!("'{ch}'"), other)),
        }
    }

    fn keyword(&mut self, what: &str) -> Result<&'a str, MalformedHeader> {
        match self.bump() {
            Some(&Token::Atom(a)) if is_keyword(a) => Ok(a),
            other => Err(unexpected(what, other)),
        }
    }

    /// Reads a value: either a quoted string or a run of atoms and the
    /// specials that may appear inside domain names and `header.b` values.
    /// `=` ends an unquoted value. Returns the value and whether it was
    /// quoted.
    fn value(&mut self, what: &str) -> Result<(String, bool), MalformedHeader> {
        if let Some(Token::Quoted(q)) = self.peek() {
            self.pos += 1;
            return Ok((q.clone(), true));
        }

        let mut value = String::new();
        while let Some(token) = self.peek() {
            match *token {
                Token::Atom(a) => value.push_str(a),
                Token::Special(c @ ('.' | '/')) => value.push(c),
                _ => break,
            }
            self.pos += 1;
        }

        if value.is_empty() {
            Err(unexpected(what, self.peek()))
        } else {
            Ok((value, false))
        }
    }
}

fn unexpected(expected: &str, found: Option<&Token<'_>>) -> MalformedHeader {
    match found {
        None => MalformedHeader::new(format!("expected {expected}, got EOF")),
        Some(t) => {
            MalformedHeader::new(format!("expected {expected}, got {t:?}"))
        },
    }
}

fn is_keyword(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_ascii_alphanumeric() || '-' == c || '_' == c)
}

/// Parses a complete `Authentication-Results` header value.
///
/// Any grammatical problem rejects the whole value. Results for methods not
/// in `KNOWN_METHODS` come back as `ResInfo::Unrecognized`.
pub fn parse_header(value: &str) -> Result<ParsedHeader, MalformedHeader> {
    let tokens = tokenise(value)?;
    let mut c = Cursor {
        tokens: &tokens,
        pos: 0,
    };

    c.cfws();
    let (authserv_id, _) = c.value("authserv-id")?;
    c.cfws();
    if let Some(&Token::Atom(version)) = c.peek() {
        if "1" != version {
            return Err(MalformedHeader::new(format!(
                "unsupported version {version}"
            )));
        }
        c.pos += 1;
        c.cfws();
    }
    c.special(';')?;
    c.cfws();

    if let Some(&Token::Atom(none)) = c.peek() {
        if none.eq_ignore_ascii_case("none") {
            let before = c.pos;
            c.pos += 1;
            c.cfws();
            if c.at_end() {
                return Ok(ParsedHeader {
                    authserv_id,
                    results: Vec::new(),
                });
            }
            c.pos = before;
        }
    }

    let mut results = Vec::new();
    loop {
        c.cfws();
        if c.at_end() {
            break;
        }

        results.push(assemble(resinfo(&mut c)?));

        c.cfws();
        if c.at_end() {
            break;
        }
        c.special(';')?;
    }

    Ok(ParsedHeader {
        authserv_id,
        results,
    })
}

fn resinfo(c: &mut Cursor<'_, '_>) -> Result<Vec<Component>, MalformedHeader> {
    let method = c.keyword("method")?.to_ascii_lowercase();
    c.cfws();

    let mut version = None;
    if c.peek_special('/') {
        c.pos += 1;
        c.cfws();
        let v = c.keyword("method version")?;
        version = Some(v.parse::<u32>().map_err(|_| {
            MalformedHeader::new(format!("bad method version {v}"))
        })?);
        c.cfws();
    }

    c.special('=')?;
    c.cfws();
    let result = c.keyword("result")?.to_ascii_lowercase();
    let mut comment = c.cfws().map(str::to_owned);
    let mut components = Vec::new();

    if let Some(&Token::Atom(a)) = c.peek() {
        if a.eq_ignore_ascii_case("reason") {
            c.pos += 1;
            c.cfws();
            c.special('=')?;
            c.cfws();
            let (reason, _) = c.value("reason")?;
            let after = c.cfws();
            if comment.is_none() {
                comment = after.map(str::to_owned);
            }
            components.push(Component::Reason(reason));
        }
    }

    while let Some(&Token::Atom(ptype)) = c.peek() {
        c.pos += 1;
        let ptype = ptype.to_ascii_lowercase();
        if !KNOWN_PTYPES.contains(&ptype.as_str()) {
            return Err(MalformedHeader::new(format!("unknown ptype {ptype}")));
        }

        c.cfws();
        c.special('.')?;
        c.cfws();
        let property = c.keyword("property")?.to_ascii_lowercase();
        c.cfws();
        c.special('=')?;
        c.cfws();
        let (value, quoted) = c.value("property value")?;
        let comment = c.cfws().map(str::to_owned);

        components.push(Component::Property(Property {
            ptype,
            property,
            value,
            quoted,
            comment,
        }));
    }

    let head = if KNOWN_METHODS.contains(&method.as_str()) {
        Component::Method {
            name: method,
            version,
            result,
            comment,
        }
    } else {
        Component::Unrecognized(method)
    };
    components.insert(0, head);

    Ok(components)
}

fn assemble(components: Vec<Component>) -> ResInfo {
    let mut components = components.into_iter();
    let mut result = match components.next() {
        Some(Component::Method {
            name,
            version,
            result,
            comment,
        }) => AuthResult {
            method: name,
            method_version: version,
            result,
            comment,
            reason: None,
            properties: Vec::new(),
        },
        Some(Component::Unrecognized(method)) => {
            return ResInfo::Unrecognized(method)
        },
        _ => return ResInfo::Unrecognized(String::new()),
    };

    for component in components {
        match component {
            Component::Reason(reason) => result.reason = Some(reason),
            Component::Property(property) => result.properties.push(property),
            Component::Method { .. } | Component::Unrecognized(..) => {},
        }
    }

    ResInfo::Result(result)
}

#[cfg(test)]
mod test {
    use super::*;

    fn results(value: &str) -> Vec<String> {
        parse_header(value)
            .unwrap()
            .results
            .into_iter()
            .map(|r| match r {
                ResInfo::Result(r) => r.to_string(),
                ResInfo::Unrecognized(m) => format!("?{m}"),
            })
            .collect()
    }

    #[test]
    fn parse_basic() {
        let parsed = parse_header(
            " example.com; iprev=pass\r\n\tpolicy.iprev=192.0.2.1 \
             (mail.example.com); dkim=pass header.i=@example.com \
             header.s=foo",
        )
        .unwrap();
        assert_eq!("example.com", parsed.authserv_id);
        assert_eq!(2, parsed.results.len());

        let ResInfo::Result(ref iprev) = parsed.results[0] else {
            panic!("unexpected {:?}", parsed.results[0]);
        };
        assert_eq!("iprev", iprev.method);
        assert_eq!("pass", iprev.result);
        assert_eq!(
            vec![Property {
                ptype: "policy".to_owned(),
                property: "iprev".to_owned(),
                value: "192.0.2.1".to_owned(),
                quoted: false,
                comment: Some("mail.example.com".to_owned()),
            }],
            iprev.properties,
        );
    }

    #[test]
    fn parse_cfws_everywhere() {
        assert_eq!(
            vec!["spf=pass (good) smtp.mailfrom=foo@example.com"],
            results(
                "example.com; (a)spf (Sender Policy Framework) = pass (good) \
                 smtp (mail transfer) . (protocol) mailfrom = \
                 foo@example.com;"
            ),
        );
    }

    #[test]
    fn parse_reason() {
        assert_eq!(
            vec![
                "spf=pass reason=\"192.0.2.1 matched ip4:192.0.2.0/27 in \
                 _spf.example.com\" (ip4)",
                "dmarc=pass",
            ],
            results(
                "example.com; spf=pass (ip4)reason=\"192.0.2.1 matched \
                 ip4:192.0.2.0/27 in _spf.example.com\"; dmarc=pass"
            ),
        );
    }

    #[test]
    fn parse_method_version() {
        assert_eq!(
            vec!["dkim/1=pass header.d=example.com"],
            results("example.com; dkim / 1 = pass header.d=example.com"),
        );
    }

    #[test]
    fn parse_unknown_method() {
        assert_eq!(
            vec!["spf=pass", "?superspf", "arc=pass", "?superarc"],
            results(
                "example.com; spf=pass; superspf=pass; arc=pass; \
                 superarc=fail policy.krypton=foo;"
            ),
        );
    }

    #[test]
    fn parse_none() {
        assert!(results("example.com; none").is_empty());
        assert!(results("example.com 1; none (nothing to see)").is_empty());
        assert!(parse_header("example.com; none; spf=pass").is_err());
        assert!(parse_header("example.com; spf=fail; none").is_err());
    }

    #[test]
    fn parse_versions() {
        assert_eq!(vec!["spf=pass"], results("example.com 1; spf=pass"));
        assert_eq!(vec!["dmarc=pass"], results("example.com 1 ; dmarc=pass"));
        assert!(parse_header("example.com 12.0; spf=pass").is_err());
        assert!(parse_header("example.com a; spf=pass").is_err());
        assert!(parse_header("example.com 1 1; spf=pass").is_err());
    }

    #[test]
    fn parse_rejects_bad_sequences() {
        for bad in &[
            "example.com",
            "example.com; spf",
            "example.com; spf=",
            "example.com; dmarc=pass; iprev=pass policy",
            "example.com; dmarc=pass; iprev=pass policy.",
            "example.com; dmarc=pass; iprev=pass policy.iprev",
            "example.com; dmarc=pass; iprev=pass policy.iprev=",
            "example.com; dmarc=pass; iprev=pass policy.iprev=\"",
            "example.com; dmarc=pass; iprev=pass policy.iprev=\"1",
            "example.com; dmarc=pass; iprev=pass policy.iprev=\"1\" (",
            "example.com; dmarc=pass; iprev=pass policy.iprev=\"1\" ( a c",
            "example.com; dmarc=pass; spf pass;",
            "example.com; dmarc=pass; iprev=pass policy.iprev.192.0.2.1",
            "example.com; dmarc=pass; iprev=pass policy=iprev=192.0.2.1",
            "example.com; dmarc=pass reason \"because\";",
            "example.com; spf=pass; iprev=pass policy.iprev=192.0.2.1 \
             reason=\"because\"",
            "example.com; spf=pass imap.override=true",
            "example.com; spf=pass; iprev=pass dnssec.signed=true",
            "example.com; spf=pass smtp.mailfrom=a=b",
            "example.com; dkim=pass header.b=AbC+/9==",
        ] {
            assert_matches!(Err(MalformedHeader(_)), parse_header(bad));
        }
    }

    #[test]
    fn parse_quoted_values() {
        assert_eq!(
            vec![
                "spf=pass smtp.mailfrom=\"a=b\"",
                "dkim=pass header.b=\"AbC+/9==\"",
            ],
            results(
                "example.com; spf=pass smtp.mailfrom=\"a=b\"; \
                 dkim=pass header.b=\"AbC+/9==\""
            ),
        );
        assert_eq!(
            vec![
                "dnswl=pass dns.zone=accept.example.com policy.ip=192.0.2.1 \
                 policy.txt=\"sure, yeah\" dns.sec=yes"
            ],
            results(
                "example.com; dnswl=pass dns.zone=accept.example.com \
                 policy.ip=192.0.2.1 policy.txt=\"sure, yeah\" dns.sec=yes"
            ),
        );
        assert_eq!(
            vec!["auth=pass smtp.auth=\"花木蘭\\\"\\\\ []\""],
            results("example.com; auth=pass smtp.auth=\"花木蘭\\\"\\\\ []\""),
        );
    }

    #[test]
    fn parse_unicode_authserv_id() {
        let parsed = parse_header(
            " 시험.example.com; spf=pass smtp.mailfrom=привіт@시험.example.com",
        )
        .unwrap();
        assert_eq!("시험.example.com", parsed.authserv_id);
        assert_eq!(
            vec!["spf=pass smtp.mailfrom=привіт@시험.example.com"],
            results(
                "시험.example.com; spf=pass \
                 smtp.mailfrom=привіт@시험.example.com"
            ),
        );
    }
}
