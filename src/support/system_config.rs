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

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::address_list::AddressList;
use crate::arc::{
    Algorithm, Canonicalisation, HashAlgorithm, DEFAULT_SIGN_HEADERS,
};
use crate::filter::Mode;

/// The configuration for arcfilter.
///
/// This is stored in a TOML file, typically `/etc/arcfilter/arcfilter.toml`.
#[derive(Clone, Debug, Deserialize)]
pub struct SystemConfig {
    /// The identity reported in `Authentication-Results` and ARC
    /// `Authentication-Results` headers, and the identity whose
    /// `Authentication-Results` headers are trusted.
    pub authserv_id: String,

    /// Whether to sign, verify, or both. Connections from peers outside
    /// `internal_hosts` are only ever verified.
    #[serde(default)]
    pub mode: Mode,

    /// Peers whose messages may be sealed.
    #[serde(default = "default_internal_hosts")]
    pub internal_hosts: AddressList,

    /// Peers whose messages are passed through without any processing.
    #[serde(default)]
    pub peer_list: AddressList,

    /// If true, add an `ARC-Filter` header naming the software, host and
    /// queue ID.
    #[serde(default)]
    pub software_header: bool,

    /// If set, use this UNIX time instead of the current time. Only useful
    /// for testing.
    #[serde(default)]
    pub fixed_timestamp: Option<i64>,

    /// Convert bare LF line endings in header values to CRLF.
    #[serde(default = "default_true")]
    pub fix_crlf: bool,

    /// If absent, messages are never sealed.
    #[serde(default)]
    pub signing: Option<SigningConfig>,

    #[serde(default)]
    pub verification: VerificationConfig,

    #[serde(default)]
    pub authentication_results: AuthResultsConfig,

    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SigningConfig {
    /// The `d=` of new ARC sets.
    pub domain: String,
    /// The `s=` of new ARC sets.
    pub selector: String,
    /// Path to the RSA private key, in PEM or DER format.
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    #[serde(default)]
    pub algorithm: Algorithm,
    /// Canonicalisation of the message signature. Seals are always relaxed.
    #[serde(default = "default_canonicalization")]
    pub canonicalization: Canonicalisation,
    /// Names of the headers covered by the message signature, where present.
    #[serde(default = "default_sign_headers")]
    pub sign_headers: Vec<String>,
    /// Names additionally signed once more than present, so that headers
    /// added later invalidate the signature.
    #[serde(default)]
    pub oversign_headers: Vec<String>,
    /// Seconds until the message signature expires; sets `x=`.
    #[serde(default)]
    pub signature_ttl: Option<u64>,
}

/// The longest accepted `signature_ttl`, in seconds.
pub const MAX_SIGNATURE_TTL: u64 = u32::MAX as u64;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// A file of `selector._domainkey.domain TXT-record` lines consulted
    /// instead of DNS.
    pub key_table: Option<PathBuf>,
    pub minimum_key_bits: u32,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            key_table: None,
            minimum_key_bits: 1024,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AuthResultsConfig {
    /// Let an `arc` result in a trusted `Authentication-Results` header
    /// override the computed chain state.
    pub permit_overrides: bool,
    /// Include `smtp.remote-ip` in the filter's own result.
    pub report_remote_ip: bool,
    /// Report the custody chain (`arc.chain`) on passing chains.
    pub final_receiver: bool,
    /// Results kept when collecting the ARC `Authentication-Results` header.
    pub max_results: usize,
}

impl Default for AuthResultsConfig {
    fn default() -> Self {
        Self {
            permit_overrides: true,
            report_remote_ip: true,
            final_receiver: false,
            max_results: 16,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Total size of the header block. 0 means unlimited.
    pub maximum_header_bytes: usize,
    /// Number of header fields. 0 means unlimited.
    pub maximum_header_count: usize,
    pub oversize_action: OversizeAction,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OversizeAction {
    #[default]
    Reject,
    /// Pass the message through without adding any headers.
    Accept,
}

fn default_true() -> bool {
    true
}

fn default_internal_hosts() -> AddressList {
    ["127.0.0.1", "::1"].into_iter().collect()
}

fn default_canonicalization() -> Canonicalisation {
    Canonicalisation::RELAXED
}

fn default_sign_headers() -> Vec<String> {
    DEFAULT_SIGN_HEADERS.iter().map(|&s| s.to_owned()).collect()
}

impl SystemConfig {
    /// Reads and validates the configuration at `path`.
    pub fn load(path: &Path) -> Result<Self, String> {
        let data = fs::read(path)
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
        let config: Self = toml::from_slice(&data)
            .map_err(|e| format!("Error in {}: {e}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.authserv_id.is_empty() {
            return Err("parameter \"authserv_id\" must not be empty".to_owned());
        }

        if let Some(ref signing) = self.signing {
            if signing.key_file.is_none() {
                return Err(
                    "parameter \"key_file\" required when signing".to_owned()
                );
            }
            if signing.domain.is_empty() || signing.selector.is_empty() {
                return Err(
                    "parameters \"domain\" and \"selector\" must not be empty"
                        .to_owned(),
                );
            }
            if signing
                .signature_ttl
                .is_some_and(|ttl| ttl > MAX_SIGNATURE_TTL)
            {
                return Err(format!(
                    "parameter \"signature_ttl\" must not exceed {}",
                    MAX_SIGNATURE_TTL,
                ));
            }
            if HashAlgorithm::Sha1 == signing.algorithm.hash {
                return Err(format!(
                    "algorithm {} is not permitted for signing",
                    signing.algorithm,
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::*;
    use crate::arc::canonicalisation::{
        BodyCanonicalisation, HeaderCanonicalisation,
    };

    fn write_config(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn minimal_config() {
        let file = write_config("authserv_id = \"example.com\"\n");
        let config = SystemConfig::load(file.path()).unwrap();

        assert_eq!("example.com", config.authserv_id);
        assert_eq!(Mode::SignVerify, config.mode);
        assert!(config.internal_hosts.contains("127.0.0.1".parse().unwrap()));
        assert!(config.internal_hosts.contains("::1".parse().unwrap()));
        assert!(config.peer_list.is_empty());
        assert!(!config.software_header);
        assert!(config.fix_crlf);
        assert!(config.signing.is_none());
        assert_eq!(1024, config.verification.minimum_key_bits);
        assert!(config.authentication_results.permit_overrides);
        assert!(config.authentication_results.report_remote_ip);
        assert_eq!(16, config.authentication_results.max_results);
        assert_eq!(OversizeAction::Reject, config.limits.oversize_action);
    }

    #[test]
    fn full_config() {
        let file = write_config(
            r#"
authserv_id = "mx.example.org"
mode = "verify"
internal_hosts = ["10.0.0.0/8"]
peer_list = ["192.0.2.7"]
software_header = true
fixed_timestamp = 1500000000

[signing]
domain = "example.org"
selector = "arc1"
key_file = "/etc/arcfilter/key.pem"
canonicalization = "simple/relaxed"
oversign_headers = ["From"]
signature_ttl = 86400

[verification]
key_table = "/etc/arcfilter/keys"
minimum_key_bits = 2048

[authentication_results]
permit_overrides = false
final_receiver = true

[limits]
maximum_header_count = 100
oversize_action = "accept"
"#,
        );
        let config = SystemConfig::load(file.path()).unwrap();

        assert_eq!(Mode::Verify, config.mode);
        assert!(config.internal_hosts.contains("10.1.2.3".parse().unwrap()));
        assert!(!config.internal_hosts.contains("127.0.0.1".parse().unwrap()));
        assert!(config.peer_list.contains("192.0.2.7".parse().unwrap()));
        assert_eq!(Some(1_500_000_000), config.fixed_timestamp);

        let signing = config.signing.unwrap();
        assert_eq!("arc1", signing.selector);
        assert_eq!(Algorithm::RSA_SHA256, signing.algorithm);
        assert_eq!(
            HeaderCanonicalisation::Simple,
            signing.canonicalization.header,
        );
        assert_eq!(
            BodyCanonicalisation::Relaxed,
            signing.canonicalization.body,
        );
        assert!(signing.sign_headers.iter().any(|h| "Subject" == h));
        assert_eq!(vec!["From".to_owned()], signing.oversign_headers);
        assert_eq!(Some(86400), signing.signature_ttl);

        assert_eq!(2048, config.verification.minimum_key_bits);
        assert!(!config.authentication_results.permit_overrides);
        assert!(config.authentication_results.report_remote_ip);
        assert!(config.authentication_results.final_receiver);
        assert_eq!(100, config.limits.maximum_header_count);
        assert_eq!(0, config.limits.maximum_header_bytes);
        assert_eq!(OversizeAction::Accept, config.limits.oversize_action);
    }

    #[test]
    fn signing_requires_key_file() {
        let file = write_config(
            r#"
authserv_id = "example.com"
[signing]
domain = "example.com"
selector = "arc"
"#,
        );
        assert_eq!(
            Err("parameter \"key_file\" required when signing".to_owned()),
            SystemConfig::load(file.path()).map(|_| ()),
        );
    }

    #[test]
    fn sha1_signing_rejected() {
        let file = write_config(
            r#"
authserv_id = "example.com"
[signing]
domain = "example.com"
selector = "arc"
key_file = "key.pem"
algorithm = "rsa-sha1"
"#,
        );
        assert!(SystemConfig::load(file.path()).is_err());
    }

    #[test]
    fn signature_ttl_range() {
        let config = |ttl: u64| {
            write_config(&format!(
                r#"
authserv_id = "example.com"
[signing]
domain = "example.com"
selector = "arc"
key_file = "key.pem"
signature_ttl = {ttl}
"#
            ))
        };

        let file = config(MAX_SIGNATURE_TTL);
        assert!(SystemConfig::load(file.path()).is_ok());
        let file = config(MAX_SIGNATURE_TTL + 1);
        assert_eq!(
            Err(format!(
                "parameter \"signature_ttl\" must not exceed {MAX_SIGNATURE_TTL}"
            )),
            SystemConfig::load(file.path()).map(|_| ()),
        );
        let file = config(i64::MAX as u64);
        assert!(SystemConfig::load(file.path()).is_err());
    }

    #[test]
    fn bad_values_rejected() {
        for text in [
            "authserv_id = \"\"\n",
            "authserv_id = \"x\"\nmode = \"seal\"\n",
            "authserv_id = \"x\"\ninternal_hosts = [\"bogus\"]\n",
            "authserv_id = \"x\"\n[limits]\noversize_action = \"drop\"\n",
            "mode = \"sign\"\n",
        ] {
            let file = write_config(text);
            assert!(SystemConfig::load(file.path()).is_err(), "{text}");
        }

        assert!(SystemConfig::load(Path::new("/nonexistent/arcfilter.toml"))
            .is_err());
    }
}
