//! Role-level verification and settlement interface.
//!
//! Implementors validate incoming payment payloads against requirements
//! ([`Facilitator::verify`]) and execute settlements ([`Facilitator::settle`]).
//! The canonical implementation is [`SchemeDispatcher`], which routes each
//! request to the scheme handler registered for the payload's
//! `(scheme, network)` pair.

use std::fmt::{Debug, Display};
use std::future::Future;
use std::sync::Arc;

use crate::proto::{
    SettleRequest, SettleResponse, SupportedResponse, VerifyRequest, VerifyResponse,
};
use crate::reason::InvalidReason;
use crate::scheme::{FacilitatorScheme, SchemeError, SchemeRegistry};

/// Asynchronous interface of an x402 facilitator.
pub trait Facilitator {
    /// The error type for internal (non-semantic) failures.
    type Error: Debug + Display;

    /// Verifies a proposed payment payload against requirements.
    ///
    /// Semantic rejections come back as `Ok` responses carrying an
    /// `invalid_reason`; [`Self::Error`] is for internal failures only.
    fn verify(
        &self,
        request: &VerifyRequest,
    ) -> impl Future<Output = Result<VerifyResponse, Self::Error>> + Send;

    /// Settles a verified payment.
    fn settle(
        &self,
        request: &SettleRequest,
    ) -> impl Future<Output = Result<SettleResponse, Self::Error>> + Send;

    /// Enumerates supported payment kinds for discovery.
    fn supported(
        &self,
    ) -> impl Future<Output = Result<SupportedResponse, Self::Error>> + Send;
}

impl<T: Facilitator + Sync> Facilitator for Arc<T> {
    type Error = T::Error;

    fn verify(
        &self,
        request: &VerifyRequest,
    ) -> impl Future<Output = Result<VerifyResponse, Self::Error>> + Send {
        self.as_ref().verify(request)
    }

    fn settle(
        &self,
        request: &SettleRequest,
    ) -> impl Future<Output = Result<SettleResponse, Self::Error>> + Send {
        self.as_ref().settle(request)
    }

    fn supported(
        &self,
    ) -> impl Future<Output = Result<SupportedResponse, Self::Error>> + Send {
        self.as_ref().supported()
    }
}

/// Routes verification and settlement to registered scheme handlers.
///
/// Dispatch is keyed on `payload.accepted`: the scheme name and network the
/// buyer signed for. A miss is a semantic `unsupported_scheme`, not an
/// internal error.
pub struct SchemeDispatcher {
    registry: SchemeRegistry<dyn FacilitatorScheme>,
}

impl SchemeDispatcher {
    pub fn new(registry: SchemeRegistry<dyn FacilitatorScheme>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SchemeRegistry<dyn FacilitatorScheme> {
        &self.registry
    }
}

impl Facilitator for SchemeDispatcher {
    type Error = SchemeError;

    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, SchemeError> {
        let accepted = &request.payment_payload.accepted;
        let handler = match self.registry.lookup(&accepted.scheme, &accepted.network) {
            Some(handler) => handler,
            None => {
                tracing::warn!(scheme = %accepted.scheme, network = %accepted.network, "No scheme handler");
                return Ok(VerifyResponse::invalid(InvalidReason::UnsupportedScheme));
            }
        };
        handler
            .verify(&request.payment_payload, &request.payment_requirements)
            .await
    }

    async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, SchemeError> {
        let accepted = &request.payment_payload.accepted;
        let handler = match self.registry.lookup(&accepted.scheme, &accepted.network) {
            Some(handler) => handler,
            None => {
                tracing::warn!(scheme = %accepted.scheme, network = %accepted.network, "No scheme handler");
                return Ok(SettleResponse::failure(
                    InvalidReason::UnsupportedScheme,
                    accepted.network.clone(),
                ));
            }
        };
        handler
            .settle(&request.payment_payload, &request.payment_requirements)
            .await
    }

    async fn supported(&self) -> Result<SupportedResponse, SchemeError> {
        Ok(self.registry.supported())
    }
}
