use async_trait::async_trait;
use dataspace_registry::registration::{
    ClaimSet, Did, IdentityDescriptor, ParticipantId, VerificationClient, VerificationError,
    VerifiedClaims,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Stand-in identity directory used until a real DID resolver is wired in.
///
/// An open directory resolves every DID and issues a membership credential; a closed one
/// only knows its explicit entries and answers `NotFound` for the rest.
#[derive(Debug, Clone, Default)]
pub(crate) struct StaticDirectory {
    entries: HashMap<String, bool>,
    open: bool,
}

impl StaticDirectory {
    pub(crate) fn open() -> Self {
        Self {
            entries: HashMap::new(),
            open: true,
        }
    }

    pub(crate) fn closed() -> Self {
        Self::default()
    }

    pub(crate) fn with_entry(mut self, did: &str, member: bool) -> Self {
        self.entries.insert(did.to_string(), member);
        self
    }

    fn membership(&self, did: &Did) -> Option<bool> {
        match self.entries.get(did.as_str()) {
            Some(member) => Some(*member),
            None if self.open => Some(true),
            None => None,
        }
    }
}

#[async_trait]
impl VerificationClient for StaticDirectory {
    async fn resolve_identity(&self, did: &Did) -> Result<IdentityDescriptor, VerificationError> {
        let member = self.membership(did).ok_or(VerificationError::NotFound)?;

        let mut claims = ClaimSet::new();
        claims.insert(
            format!("{did}#membership"),
            json!({
                "vc": {
                    "issuer": "did:web:registry.local",
                    "credentialSubject": { "id": did.as_str(), "gaiaXMember": member.to_string() }
                }
            }),
        );

        Ok(IdentityDescriptor {
            did: did.clone(),
            verification_methods: vec![format!("{did}#key-1")],
            credentials_endpoint: None,
            presented_claims: claims,
        })
    }

    async fn verify_credentials(
        &self,
        participant_id: &ParticipantId,
        claims: &ClaimSet,
    ) -> Result<VerifiedClaims, VerificationError> {
        if claims.is_empty() {
            return Err(VerificationError::Invalid(
                "no credentials presented".to_string(),
            ));
        }
        if let Some((key, _)) = claims.iter().find(|(_, value)| value.get("vc").is_none()) {
            return Err(VerificationError::Invalid(format!(
                "{key} is not a verifiable credential"
            )));
        }

        Ok(VerifiedClaims {
            participant_id: participant_id.clone(),
            claims: claims.clone(),
        })
    }
}
