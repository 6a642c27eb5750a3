use cloudflare::{endpoints, framework::response::ApiFailure};

use crate::endpoint::{Endpoint, RecordType};

use super::ProviderError;

impl From<ApiFailure> for ProviderError {
    fn from(e: ApiFailure) -> Self {
        ProviderError::Internal(e.to_string())
    }
}

impl From<&endpoints::zone::Zone> for crate::provider::Zone {
    fn from(z: &endpoints::zone::Zone) -> Self {
        crate::provider::Zone {
            id: z.id.clone(),
            name: z.name.clone(),
        }
    }
}

/// Converts a Cloudflare API record into our [`Endpoint`] view. Fails (and is filtered out by
/// the caller) for record kinds we don't manage.
pub fn record_to_endpoint(r: &endpoints::dns::DnsRecord) -> Result<Endpoint, String> {
    let (record_type, target) = match &r.content {
        endpoints::dns::DnsContent::A { content } => (RecordType::A, content.to_string()),
        endpoints::dns::DnsContent::AAAA { content } => (RecordType::Aaaa, content.to_string()),
        endpoints::dns::DnsContent::CNAME { content } => (RecordType::Cname, content.clone()),
        endpoints::dns::DnsContent::TXT { content } => (RecordType::Txt, content.clone()),
        other => return Err(format!("unsupported record kind: {other:?}")),
    };
    Ok(Endpoint {
        dnsname: r.name.clone(),
        targets: vec![target],
        record_type,
        record_ttl: Some(r.ttl),
        proxied: r.proxied.unwrap_or(false),
        container_id: None,
        container_name: None,
    })
}

/// Converts an [`Endpoint`]'s single target into the content field the Cloudflare API expects.
/// Endpoints handed to the provider always carry exactly one target per record.
pub fn endpoint_to_content(e: &Endpoint) -> Result<endpoints::dns::DnsContent, String> {
    let target = e
        .targets
        .first()
        .ok_or_else(|| format!("endpoint {} has no target", e.dnsname))?;
    Ok(match e.record_type {
        RecordType::A => endpoints::dns::DnsContent::A {
            content: target
                .parse()
                .map_err(|_| format!("invalid IPv4 address: {target}"))?,
        },
        RecordType::Aaaa => endpoints::dns::DnsContent::AAAA {
            content: target
                .parse()
                .map_err(|_| format!("invalid IPv6 address: {target}"))?,
        },
        RecordType::Cname => endpoints::dns::DnsContent::CNAME {
            content: target.clone(),
        },
        RecordType::Txt => endpoints::dns::DnsContent::TXT {
            content: target.clone(),
        },
    })
}
