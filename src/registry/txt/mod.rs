mod crypto;

use std::collections::HashMap;

use log::{debug, warn};

use crate::endpoint::{Changes, Endpoint, RecordType, TTL_AUTO};
use crate::provider::{Provider, ProviderError};

use super::{Registry, RegistryError};

const HERITAGE_KEY: &str = "heritage";
const HERITAGE_VALUE: &str = "sherpa-dns";
const OWNER_KEY: &str = "owner";
const RESOURCE_KEY: &str = "resource";
const RESOURCE_VALUE: &str = "docker";
const TARGETS_KEY: &str = "targets";
const TTL_KEY: &str = "ttl";
const ENCRYPTION_PREFIX: &str = "v1:AES256:";

/// Configuration for a [`TxtRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxtRegistryConfig {
    /// Prefix prepended to a dnsname to form its ownership marker's record name.
    pub txt_prefix: String,
    /// Identifier stored in ownership markers; distinguishes co-tenant instances sharing a zone.
    pub owner_id: String,
    /// Literal `*` in a dnsname is replaced with this string when forming a marker name
    /// (TXT records cannot start with a wildcard label on most providers).
    pub wildcard_replacement: String,
    /// Whether marker content should be wrapped in the AES envelope.
    pub encrypt: bool,
    /// Passphrase used to derive the encryption key, required if `encrypt` is true.
    pub encryption_key: Option<String>,
}
impl Default for TxtRegistryConfig {
    fn default() -> Self {
        TxtRegistryConfig {
            txt_prefix: "sherpa-dns-".to_string(),
            owner_id: "default".to_string(),
            wildcard_replacement: "star".to_string(),
            encrypt: false,
            encryption_key: None,
        }
    }
}

/// Tracks ownership of managed records via TXT markers living alongside them in the zone.
///
/// Marker names do not encode record type (see the design notes on "single marker, multiple
/// record types") - one marker asserts ownership of a dnsname's managed records as a set.
pub struct TxtRegistry {
    config: TxtRegistryConfig,
    dry_run: bool,
}

impl TxtRegistry {
    pub fn new(config: TxtRegistryConfig) -> Self {
        TxtRegistry {
            config,
            dry_run: false,
        }
    }

    fn marker_name(&self, dnsname: &str) -> String {
        let substituted = dnsname.replacen('*', &self.config.wildcard_replacement, 1);
        format!("{}{}", self.config.txt_prefix, substituted)
    }

    fn serialize_marker(&self, targets: &[String], ttl: Option<u32>) -> String {
        let mut parts = vec![
            format!("{HERITAGE_KEY}={HERITAGE_VALUE}"),
            format!("{OWNER_KEY}={}", self.config.owner_id),
            format!("{RESOURCE_KEY}={RESOURCE_VALUE}"),
        ];
        if !targets.is_empty() {
            parts.push(format!("{TARGETS_KEY}={}", targets.join(",")));
        }
        match ttl {
            None => {}
            Some(TTL_AUTO) => parts.push(format!("{TTL_KEY}=auto")),
            Some(t) => parts.push(format!("{TTL_KEY}={t}")),
        }
        parts.join(",")
    }

    fn marker_endpoint(&self, dnsname: &str, targets: &[String], ttl: Option<u32>) -> Endpoint {
        let plaintext = self.serialize_marker(targets, ttl);
        let content = if self.config.encrypt {
            let key = self
                .config
                .encryption_key
                .as_deref()
                .expect("encrypt=true requires an encryption_key");
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            format!("{ENCRYPTION_PREFIX}{}", crypto::encrypt(key, &plaintext, now))
        } else {
            plaintext
        };
        Endpoint {
            dnsname: self.marker_name(dnsname),
            targets: vec![content],
            record_type: RecordType::Txt,
            record_ttl: None,
            proxied: false,
            container_id: None,
            container_name: None,
        }
    }

    /// Parses a marker's raw content into its key/value pairs, decrypting first if configured.
    /// Values may themselves contain commas (e.g. `targets`), so parsing treats any comma-
    /// separated token without an `=` as a continuation of the previous value rather than a
    /// new key.
    fn parse_marker(&self, raw: &str) -> Option<HashMap<String, String>> {
        let unquoted = raw.trim_matches('"');
        let plaintext = if let Some(body) = unquoted.strip_prefix(ENCRYPTION_PREFIX) {
            let key = self.config.encryption_key.as_deref()?;
            match crypto::decrypt(key, body) {
                Ok(p) => p,
                Err(e) => {
                    warn!("could not decrypt ownership marker: {e}");
                    return None;
                }
            }
        } else {
            unquoted.to_string()
        };

        let mut pairs: Vec<(String, String)> = Vec::new();
        for token in plaintext.split(',') {
            match token.split_once('=') {
                Some((k, v)) => pairs.push((k.to_string(), v.to_string())),
                None => {
                    if let Some(last) = pairs.last_mut() {
                        last.1.push(',');
                        last.1.push_str(token);
                    }
                }
            }
        }
        Some(pairs.into_iter().collect())
    }

    fn is_ours(&self, fields: &HashMap<String, String>) -> bool {
        fields.get(HERITAGE_KEY).map(String::as_str) == Some(HERITAGE_VALUE)
            && fields.get(OWNER_KEY).map(String::as_str) == Some(self.config.owner_id.as_str())
    }
}

impl Registry for TxtRegistry {
    fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    fn records(&self, provider: &dyn Provider) -> Result<Vec<Endpoint>, RegistryError> {
        let non_txt = provider.records()?;
        let txt = provider.txt_records()?;

        let markers: HashMap<&str, HashMap<String, String>> = txt
            .iter()
            .filter_map(|t| {
                let content = t.targets.first()?;
                self.parse_marker(content).map(|f| (t.dnsname.as_str(), f))
            })
            .collect();

        let owned = non_txt
            .into_iter()
            .filter_map(|mut record| {
                let marker_name = self.marker_name(&record.dnsname);
                let fields = markers.get(marker_name.as_str())?;
                if !self.is_ours(fields) {
                    return None;
                }
                if let Some(ttl) = fields.get(TTL_KEY) {
                    record.record_ttl = if ttl == "auto" {
                        Some(TTL_AUTO)
                    } else {
                        ttl.parse().ok()
                    };
                }
                Some(record)
            })
            .collect();

        Ok(owned)
    }

    fn sync(&self, provider: &dyn Provider, changes: &Changes) -> Result<(), RegistryError> {
        let mut errors: Vec<String> = Vec::new();
        let mut record_err = |e: ProviderError| errors.push(e.to_string());

        for endpoint in &changes.create {
            if let Err(e) = provider.create(endpoint) {
                record_err(e);
                continue;
            }
            let marker = self.marker_endpoint(&endpoint.dnsname, &endpoint.targets, endpoint.record_ttl);
            if let Err(e) = provider.create(&marker) {
                record_err(e);
            }
        }

        for (old, new) in changes.update_old.iter().zip(changes.update_new.iter()) {
            if let Err(e) = provider.update(old, new) {
                record_err(e);
                continue;
            }
            let old_marker_name = self.marker_name(&old.dnsname);
            let new_marker = self.marker_endpoint(&new.dnsname, &new.targets, new.record_ttl);
            if old_marker_name == new_marker.dnsname {
                let old_marker = self.marker_endpoint(&old.dnsname, &old.targets, old.record_ttl);
                if let Err(e) = provider.update(&old_marker, &new_marker) {
                    record_err(e);
                }
            } else {
                let old_marker = self.marker_endpoint(&old.dnsname, &old.targets, old.record_ttl);
                if let Err(e) = provider.delete(&old_marker) {
                    record_err(e);
                }
                if let Err(e) = provider.create(&new_marker) {
                    record_err(e);
                }
            }
        }

        for endpoint in &changes.delete {
            if let Err(e) = provider.delete(endpoint) {
                record_err(e);
                continue;
            }
            let marker = self.marker_endpoint(&endpoint.dnsname, &endpoint.targets, endpoint.record_ttl);
            if let Err(e) = provider.delete(&marker) {
                record_err(e);
            }
        }

        if errors.is_empty() {
            debug!("sync applied cleanly");
            Ok(())
        } else {
            Err(RegistryError::Internal(errors.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TxtRegistry {
        TxtRegistry::new(TxtRegistryConfig::default())
    }

    #[test]
    fn marker_name_replaces_wildcard() {
        let r = registry();
        assert_eq!(r.marker_name("*.apps.example.com"), "sherpa-dns-star.apps.example.com");
        assert_eq!(r.marker_name("web.example.com"), "sherpa-dns-web.example.com");
    }

    #[test]
    fn serialize_then_parse_roundtrips() {
        let r = registry();
        let content = r.serialize_marker(&["10.0.0.1".to_string(), "10.0.0.2".to_string()], None);
        let fields = r.parse_marker(&content).unwrap();
        assert_eq!(fields.get("heritage").unwrap(), "sherpa-dns");
        assert_eq!(fields.get("owner").unwrap(), "default");
        assert_eq!(fields.get("resource").unwrap(), "docker");
        assert_eq!(fields.get("targets").unwrap(), "10.0.0.1,10.0.0.2");
        assert!(!fields.contains_key("ttl"));
        assert!(r.is_ours(&fields));
    }

    #[test]
    fn serialize_with_explicit_auto_ttl_writes_ttl_auto() {
        let r = registry();
        let content = r.serialize_marker(&["10.0.0.1".to_string()], Some(TTL_AUTO));
        let fields = r.parse_marker(&content).unwrap();
        assert_eq!(fields.get("ttl").unwrap(), "auto");
    }

    #[test]
    fn parse_marker_strips_surrounding_quotes() {
        let r = registry();
        let content = r.serialize_marker(&["10.0.0.1".to_string()], Some(300));
        let quoted = format!("\"{content}\"");
        let fields = r.parse_marker(&quoted).unwrap();
        assert_eq!(fields.get("ttl").unwrap(), "300");
    }

    #[test]
    fn foreign_marker_is_not_ours() {
        let r = registry();
        let fields = r.parse_marker("heritage=sherpa-dns,owner=someone-else,resource=docker").unwrap();
        assert!(!r.is_ours(&fields));
    }

    #[test]
    fn encrypted_marker_roundtrips_through_provider_content() {
        let mut config = TxtRegistryConfig::default();
        config.encrypt = true;
        config.encryption_key = Some("sw0rdfish".to_string());
        let r = TxtRegistry::new(config);

        let endpoint = r.marker_endpoint("web.example.com", &["10.0.0.1".to_string()], None);
        let content = &endpoint.targets[0];
        assert!(content.starts_with(ENCRYPTION_PREFIX));

        let fields = r.parse_marker(content).unwrap();
        assert!(r.is_ours(&fields));
        assert_eq!(fields.get("targets").unwrap(), "10.0.0.1");
    }
}
