//! Signing identity for Polymarket.
//!
//! A [`ClobSigner`] is built once from the configured private key. The SDK
//! uses it for EIP-712 order signing and API-key derivation.

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use polymarket_client_sdk::clob::types::SignatureType;
use polymarket_client_sdk::{derive_proxy_wallet, POLYGON};

use crate::error::TradingError;

/// Convert a u8 signature type from config to SDK SignatureType.
///
/// Signature types:
/// - 0: EOA (Externally Owned Account) - standard wallet
/// - 1: Magic.link - proxy wallet
/// - 2: Gnosis Safe - multi-sig
pub fn signature_type_from_u8(sig_type: u8) -> SignatureType {
    match sig_type {
        1 => SignatureType::Proxy,
        2 => SignatureType::GnosisSafe,
        _ => SignatureType::Eoa,
    }
}

/// Human-readable label for a signature type.
pub fn signature_type_label(sig_type: SignatureType) -> &'static str {
    match sig_type {
        SignatureType::Proxy => "proxy",
        SignatureType::GnosisSafe => "gnosis-safe",
        _ => "eoa",
    }
}

/// Create a LocalSigner from a hex-encoded private key.
///
/// The private key can be with or without the "0x" prefix. The signer is
/// bound to the Polygon chain id.
pub fn create_signer(private_key: &str) -> Result<PrivateKeySigner, TradingError> {
    let key = private_key.strip_prefix("0x").unwrap_or(private_key);
    let bytes = hex::decode(key)
        .map_err(|e| TradingError::SigningError(format!("Invalid private key hex: {}", e)))?;

    if bytes.len() != 32 {
        return Err(TradingError::SigningError(format!(
            "Private key must be 32 bytes, got {}",
            bytes.len()
        )));
    }

    let mut key_bytes = [0u8; 32];
    key_bytes.copy_from_slice(&bytes);

    let signer = PrivateKeySigner::from_bytes(&key_bytes.into())
        .map_err(|e| TradingError::SigningError(format!("Failed to create signer: {}", e)))?;
    Ok(signer.with_chain_id(Some(POLYGON)))
}

/// Wallet used for authenticated CLOB calls.
#[derive(Debug, Clone)]
pub struct ClobSigner {
    signer: PrivateKeySigner,
    signature_type: SignatureType,
    funder: Option<String>,
}

impl ClobSigner {
    /// Build from config values.
    pub fn new(
        private_key: &str,
        signature_type: u8,
        funder: Option<String>,
    ) -> Result<Self, TradingError> {
        Ok(Self {
            signer: create_signer(private_key)?,
            signature_type: signature_type_from_u8(signature_type),
            funder: funder.filter(|f| !f.is_empty()),
        })
    }

    /// The underlying alloy signer.
    pub fn inner(&self) -> &PrivateKeySigner {
        &self.signer
    }

    /// EOA address of the key.
    pub fn eoa(&self) -> Address {
        self.signer.address()
    }

    /// Checksummed EOA address.
    pub fn address(&self) -> String {
        format!("{:?}", self.eoa())
    }

    /// Address that holds the funds.
    ///
    /// Proxy wallets use the configured funder, or the CREATE2 proxy derived
    /// from the EOA when none is set.
    pub fn maker_address(&self) -> String {
        match (self.signature_type, &self.funder) {
            (SignatureType::Eoa, _) => self.address(),
            (_, Some(funder)) => funder.clone(),
            (_, None) => derive_proxy_wallet(self.eoa(), POLYGON)
                .map(|proxy| format!("{:?}", proxy))
                .unwrap_or_else(|| self.address()),
        }
    }

    /// Signature type of this wallet.
    pub fn signature_type(&self) -> SignatureType {
        self.signature_type
    }
}
