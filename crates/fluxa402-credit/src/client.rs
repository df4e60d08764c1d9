//! Buyer side of the credit scheme.
//!
//! The client renders the payment payload into the `PAYMENT-SIGNATURE`
//! header, then signs an HTTP Message Signature over those exact header
//! bytes with its Ed25519 agent key. The resource server forwards the raw
//! header material to the facilitator as a [`WebBotAuthEnvelope`].

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD as b64, URL_SAFE_NO_PAD as b64url};
use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};
use serde_json::json;

use fluxa402_types::proto::{
    PaymentPayload, PaymentRequirements, ResourceInfo, WebBotAuthEnvelope, X402Version2,
};
use fluxa402_types::scheme::{ClientScheme, SchemeError};
use fluxa402_types::timestamp::UnixTimestamp;

use crate::httpsig::{authority_of, signature_base, Jwk, MAX_WINDOW_SECS};

const SIGNATURE_LABEL: &str = "sig1";
const AGENT_ID_FIELD: &str = "signature-fluxa-ai-agent-id";

/// The four header values a signed credit request carries.
#[derive(Debug, Clone)]
pub struct SignedCreditRequest {
    /// `PAYMENT-SIGNATURE` header value.
    pub payment_signature: String,
    /// `Signature-Agent` header value, double quotes included.
    pub signature_agent: String,
    /// `Signature-Input` header value.
    pub signature_input: String,
    /// `Signature` header value.
    pub signature: String,
}

impl SignedCreditRequest {
    /// The envelope a resource server forwards to the facilitator, carrying
    /// the exact header bytes as received.
    pub fn envelope(&self) -> WebBotAuthEnvelope {
        WebBotAuthEnvelope {
            signature_agent: self.signature_agent.clone(),
            signature_input: self.signature_input.clone(),
            signature: self.signature.clone(),
            payment_signature_header: self.payment_signature.clone(),
        }
    }
}

/// Buyer-side `fluxacredit` implementation.
pub struct FluxaCreditClient {
    signing_key: SigningKey,
    /// Directory URL published as the `Signature-Agent`, unquoted.
    signature_agent: String,
    agent_id: Option<String>,
}

impl FluxaCreditClient {
    pub fn new<S: Into<String>>(signing_key: SigningKey, signature_agent: S) -> Self {
        Self {
            signing_key,
            signature_agent: signature_agent.into(),
            agent_id: None,
        }
    }

    /// Sets the logical agent id carried inside the payment payload.
    pub fn with_agent_id<S: Into<String>>(mut self, agent_id: S) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// The public key as the JWK the agent's directory publishes.
    pub fn jwk(&self) -> Jwk {
        let x = b64url.encode(self.signing_key.verifying_key().as_bytes());
        Jwk::ed25519(x)
    }

    /// The RFC 7638 thumbprint this client signs under.
    pub fn thumbprint(&self) -> String {
        self.jwk().thumbprint().expect("own key is Ed25519")
    }

    fn scheme_payload(&self) -> serde_json::Value {
        match &self.agent_id {
            Some(id) => json!({ AGENT_ID_FIELD: id }),
            None => json!({}),
        }
    }

    /// Builds the payment payload and signs the request headers.
    pub fn sign_request(
        &self,
        resource: &ResourceInfo,
        selected: &PaymentRequirements,
    ) -> Result<SignedCreditRequest, SchemeError> {
        let payload = PaymentPayload {
            x402_version: X402Version2,
            resource: resource.clone(),
            accepted: selected.clone(),
            payload: self.scheme_payload(),
            extensions: Default::default(),
        };
        let payment_signature = payload
            .to_header()
            .map_err(|e| SchemeError::Decoding(e.to_string()))?;

        let created = UnixTimestamp::now().as_secs();
        let expires = created + MAX_WINDOW_SECS;
        let signature_input = format!(
            "{SIGNATURE_LABEL}=(\"payment-signature\" \"signature-agent\" \"@authority\");\
             created={created};expires={expires};keyid=\"{}\";tag=\"web-bot-auth\"",
            self.thumbprint()
        );
        let signature_agent = format!("\"{}\"", self.signature_agent);
        let authority = authority_of(&resource.url)
            .map_err(|e| SchemeError::Decoding(e.to_string()))?;
        let params_segment = signature_input
            .split_once('=')
            .map(|(_, rest)| rest)
            .expect("signature input has a label");
        let base = signature_base(
            &payment_signature,
            &signature_agent,
            &authority,
            params_segment,
        );
        let signature = self.signing_key.sign(&base);
        let signature = format!("{SIGNATURE_LABEL}=:{}:", b64.encode(signature.to_bytes()));

        Ok(SignedCreditRequest {
            payment_signature,
            signature_agent,
            signature_input,
            signature,
        })
    }
}

#[async_trait]
impl ClientScheme for FluxaCreditClient {
    async fn create_payment(
        &self,
        resource: &ResourceInfo,
        selected: &PaymentRequirements,
    ) -> Result<PaymentPayload, SchemeError> {
        Ok(PaymentPayload {
            x402_version: X402Version2,
            resource: resource.clone(),
            accepted: selected.clone(),
            payload: self.scheme_payload(),
            extensions: Default::default(),
        })
    }
}
