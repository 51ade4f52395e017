//! Live exchange gateway backed by the Polymarket CLOB.

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::execution::{self, AuthedClob};
use super::gateway::{ExchangeGateway, ResolutionSource};
use super::order::{OrderParams, OrderResult, OrderState};
use crate::config::Config;
use crate::error::TradingError;
use crate::market::{MarketWindow, PolymarketClient, WindowStatus};
use crate::signing::ClobSigner;

/// Sends real orders through an authenticated SDK client.
pub struct LiveGateway {
    client: PolymarketClient,
    signer: ClobSigner,
    clob: AuthedClob,
}

impl LiveGateway {
    /// Build the signer from config and authenticate with the CLOB.
    ///
    /// A malformed key fails before any network call.
    pub async fn connect(client: PolymarketClient, config: &Config) -> Result<Self, TradingError> {
        let signer = ClobSigner::new(
            &config.polymarket_private_key,
            config.polymarket_signature_type,
            config.polymarket_funder.clone(),
        )?;
        let clob = execution::authenticate(client.clob_url(), &signer).await?;
        Ok(Self {
            client,
            signer,
            clob,
        })
    }

    /// Wallet address orders are signed with.
    pub fn address(&self) -> String {
        self.signer.address()
    }

    /// Address that holds the collateral.
    pub fn maker_address(&self) -> String {
        self.signer.maker_address()
    }

    /// USDC collateral available to trade.
    pub async fn balance(&self) -> Result<Decimal, TradingError> {
        execution::get_balance(&self.clob).await
    }
}

#[async_trait]
impl ExchangeGateway for LiveGateway {
    async fn place_limit_order(&self, params: &OrderParams) -> Result<OrderResult, TradingError> {
        execution::submit_order(&self.clob, &self.signer, params).await
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), TradingError> {
        execution::cancel_order(&self.clob, order_id).await
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderState, TradingError> {
        execution::get_order_status(&self.clob, order_id).await
    }

    async fn window_status(&self, window: &MarketWindow) -> Result<WindowStatus, TradingError> {
        self.client.resolve(window).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;

    #[tokio::test]
    async fn connect_rejects_bad_key_before_network() {
        let config = Config {
            mode: Mode::Live,
            polymarket_private_key: "0x1234".to_string(),
            polymarket_clob_url: "http://127.0.0.1:9".to_string(),
            ..Config::default()
        };
        let client = PolymarketClient::new(&config).unwrap();
        let err = LiveGateway::connect(client, &config).await.err().unwrap();
        assert!(matches!(err, TradingError::SigningError(_)));
    }
}
