//! Scheme registration for the fluxa402 facilitator.
//!
//! Builds the facilitator-side registry from configuration:
//! `fluxacredit` binds exactly to `fluxa:monetize`, `odp-deferred` binds to
//! the `eip155:*` family. A duplicate binding aborts startup.

use std::sync::Arc;

use alloy_network::EthereumWallet;
use alloy_primitives::{Address, U256};
use alloy_provider::ProviderBuilder;
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use url::Url;

use fluxa402_credit::httpsig::HttpKeyDirectory;
use fluxa402_credit::{fluxa_monetize, FluxaCreditFacilitator, CREDIT_SCHEME};
use fluxa402_odp::chain::{EvmSigner, FacilitatorEvmSigner, MockEvmSigner};
use fluxa402_odp::store::InMemorySessionStore;
use fluxa402_odp::{OdpDeferredConfig, OdpDeferredFacilitator, ODP_SCHEME};
use fluxa402_types::facilitator::SchemeDispatcher;
use fluxa402_types::network::NetworkPattern;
use fluxa402_types::scheme::{FacilitatorScheme, SchemeRegistry};

use crate::config::{Config, OdpConfig};

/// The built scheme set: the dispatcher plus a handle on the deferred
/// facilitator for the scheduler and metrics.
pub struct Schemes {
    pub dispatcher: SchemeDispatcher,
    pub odp: Option<Arc<OdpDeferredFacilitator>>,
}

pub fn build(config: &Config) -> Result<Schemes, Box<dyn std::error::Error>> {
    let mut registry: SchemeRegistry<dyn FacilitatorScheme> = SchemeRegistry::new();

    if let Some(credit) = config.credit() {
        let directory = HttpKeyDirectory::new(credit.allow_loopback_http);
        let facilitator = Arc::new(FluxaCreditFacilitator::new(Arc::new(directory)));
        registry.register(
            CREDIT_SCHEME,
            NetworkPattern::Exact(fluxa_monetize()),
            facilitator,
        )?;
    }

    let mut odp_handle = None;
    if let Some(odp) = config.odp() {
        let signer = build_odp_signer(odp)?;
        let facilitator = Arc::new(OdpDeferredFacilitator::new(
            OdpDeferredConfig {
                settlement_contract: odp.settlement_contract,
                debit_wallet: odp.debit_wallet,
                withdraw_delay_seconds: U256::from(odp.withdraw_delay_seconds),
                settlement_mode: odp.settlement_mode,
                max_receipts_per_settlement: odp.max_receipts_per_settlement,
                networks: odp.networks.clone(),
            },
            signer,
            Arc::new(InMemorySessionStore::new()),
        ));
        registry.register(ODP_SCHEME, NetworkPattern::family("eip155"), facilitator.clone())?;
        odp_handle = Some(facilitator);
    }

    if registry.is_empty() {
        return Err("no schemes configured; add a credit or odp block".into());
    }

    Ok(Schemes {
        dispatcher: SchemeDispatcher::new(registry),
        odp: odp_handle,
    })
}

fn build_odp_signer(
    odp: &OdpConfig,
) -> Result<Arc<dyn FacilitatorEvmSigner>, Box<dyn std::error::Error>> {
    let Some(rpc_url) = odp.rpc_url.as_deref() else {
        // In-memory chain state: synthetic benchmarks and local development.
        tracing::warn!("odp running without an RPC endpoint; debit wallet state is in-memory");
        let signer = MockEvmSigner::new(U256::from(odp.withdraw_delay_seconds), Vec::new())
            .with_default_balance(U256::MAX);
        return Ok(Arc::new(signer));
    };

    let chain_id = odp
        .networks
        .first()
        .and_then(|network| network.eip155_chain_id());
    let mut signers = Vec::with_capacity(odp.signer_keys.len());
    for key in &odp.signer_keys {
        let signer: PrivateKeySigner = key.parse()?;
        signers.push(signer.with_chain_id(chain_id));
    }
    let mut iter = signers.into_iter();
    let first = iter.next().ok_or("odp.signerKeys must not be empty")?;
    let addresses: Vec<Address> = std::iter::once(first.address())
        .chain(iter.clone().map(|s| s.address()))
        .collect();
    let mut wallet = EthereumWallet::from(first);
    for signer in iter {
        wallet.register_signer(signer);
    }

    let url: Url = rpc_url.parse()?;
    let provider = ProviderBuilder::new().wallet(wallet).connect_http(url);
    Ok(Arc::new(EvmSigner::new(provider, addresses)))
}
