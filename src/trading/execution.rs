//! Authenticated CLOB calls through `polymarket-client-sdk`.
//!
//! The SDK owns EIP-712 order signing, API-key derivation and the L2 request
//! headers. This module maps its responses onto the crate's order types.

use std::str::FromStr;

use alloy::primitives::U256;
use polymarket_client_sdk::auth::state::Authenticated;
use polymarket_client_sdk::auth::Normal;
use polymarket_client_sdk::clob::types::request::BalanceAllowanceRequest;
use polymarket_client_sdk::clob::types::{OrderType as SdkOrderType, Side as SdkSide};
use polymarket_client_sdk::clob::{Client as SdkClient, Config as SdkConfig};
use rust_decimal::Decimal;
use tracing::{debug, error, info, instrument, warn};

use super::order::{OrderParams, OrderResult, OrderState, OrderStatus, Side, TimeInForce};
use crate::error::TradingError;
use crate::signing::ClobSigner;

/// CLOB client holding derived API credentials.
pub type AuthedClob = SdkClient<Authenticated<Normal>>;

/// Authenticate against the CLOB, deriving or creating the L2 API key.
#[instrument(skip(signer), fields(address = %signer.address()))]
pub async fn authenticate(clob_url: &str, signer: &ClobSigner) -> Result<AuthedClob, TradingError> {
    let config = SdkConfig::builder().use_server_time(true).build();

    let client = SdkClient::new(clob_url, config)
        .map_err(|e| TradingError::AuthFailed(format!("Failed to create CLOB client: {}", e)))?
        .authentication_builder(signer.inner())
        .signature_type(signer.signature_type())
        .authenticate()
        .await
        .map_err(|e| TradingError::AuthFailed(format!("Failed to authenticate: {}", e)))?;

    info!(maker = %signer.maker_address(), "CLOB client authenticated");
    Ok(client)
}

fn sdk_side(side: Side) -> SdkSide {
    match side {
        Side::Buy => SdkSide::Buy,
        Side::Sell => SdkSide::Sell,
    }
}

fn sdk_order_type(tif: TimeInForce) -> SdkOrderType {
    match tif {
        TimeInForce::GTC => SdkOrderType::GTC,
        TimeInForce::FOK => SdkOrderType::FOK,
    }
}

/// Submit a signed limit order.
///
/// A placement status of `matched` means the order filled on placement.
/// Exchange-side refusals come back as [`OrderResult::Rejected`].
#[instrument(skip(client, signer, params), fields(token = %params.token_id, side = %params.side))]
pub async fn submit_order(
    client: &AuthedClob,
    signer: &ClobSigner,
    params: &OrderParams,
) -> Result<OrderResult, TradingError> {
    params.validate().map_err(TradingError::InvalidParams)?;

    let token_id = U256::from_str(&params.token_id)
        .map_err(|e| TradingError::InvalidParams(format!("Invalid token id: {}", e)))?;

    debug!(
        price = %params.price,
        size = %params.size,
        tif = %params.tif,
        post_only = params.post_only,
        "Submitting order"
    );

    let order = client
        .limit_order()
        .token_id(token_id)
        .order_type(sdk_order_type(params.tif))
        .price(params.price)
        .size(params.size)
        .side(sdk_side(params.side))
        .post_only(params.post_only)
        .build()
        .await
        .map_err(|e| TradingError::SubmissionFailed(format!("Failed to build order: {}", e)))?;

    let signed = client
        .sign(signer.inner(), order)
        .await
        .map_err(|e| TradingError::SigningError(format!("Failed to sign order: {}", e)))?;

    match client.post_order(signed).await {
        Ok(response) => {
            let status = format!("{:?}", response.status);
            Ok(interpret_submit(params, response.order_id, &status))
        }
        Err(e) => {
            warn!(error = %e, "Order refused");
            Ok(OrderResult::Rejected {
                reason: e.to_string(),
            })
        }
    }
}

/// Map a placement response onto an [`OrderResult`].
fn interpret_submit(params: &OrderParams, order_id: String, status: &str) -> OrderResult {
    if order_id.is_empty() {
        return OrderResult::Rejected {
            reason: "no order id in response".to_string(),
        };
    }

    let matched = parse_status(status).is_some_and(|s| s.is_filled());
    if matched {
        info!(order_id = %order_id, price = %params.price, size = %params.size, "Order matched on placement");
        OrderResult::Filled {
            order_id,
            price: params.price,
            size: params.size,
        }
    } else {
        info!(order_id = %order_id, price = %params.price, size = %params.size, "Order resting");
        OrderResult::Pending { order_id }
    }
}

/// Parse an SDK status label ("Live", "MATCHED", "ORDER_STATUS_CANCELED").
fn parse_status(raw: &str) -> Option<OrderStatus> {
    let lower = raw.to_ascii_lowercase();
    let label = lower.strip_prefix("order_status_").unwrap_or(&lower);
    label.parse::<OrderStatus>().ok()
}

/// Fetch an order's current state.
#[instrument(skip(client))]
pub async fn get_order_status(client: &AuthedClob, order_id: &str) -> Result<OrderState, TradingError> {
    let response = client
        .order(order_id)
        .await
        .map_err(|e| TradingError::StatusFailed {
            order_id: order_id.to_string(),
            reason: e.to_string(),
        })?;

    let status = format!("{:?}", response.status);
    order_state(
        order_id,
        &status,
        response.size_matched,
        response.original_size,
        response.price,
    )
    .ok_or_else(|| TradingError::StatusFailed {
        order_id: order_id.to_string(),
        reason: format!("unknown status {}", status),
    })
}

fn order_state(
    order_id: &str,
    status: &str,
    size_matched: Decimal,
    original_size: Decimal,
    price: Decimal,
) -> Option<OrderState> {
    Some(OrderState {
        order_id: order_id.to_string(),
        status: parse_status(status)?,
        filled_size: size_matched,
        original_size,
        fill_price: Some(price).filter(|p| *p > Decimal::ZERO),
    })
}

/// Cancel a single order.
#[instrument(skip(client))]
pub async fn cancel_order(client: &AuthedClob, order_id: &str) -> Result<(), TradingError> {
    match client.cancel_order(order_id).await {
        Ok(_) => {
            info!(order_id = %order_id, "Order cancelled");
            Ok(())
        }
        Err(e) => {
            error!(order_id = %order_id, error = %e, "Failed to cancel order");
            Err(TradingError::CancelFailed {
                order_id: order_id.to_string(),
                reason: e.to_string(),
            })
        }
    }
}

/// Get USDC collateral balance.
#[instrument(skip(client))]
pub async fn get_balance(client: &AuthedClob) -> Result<Decimal, TradingError> {
    let request = BalanceAllowanceRequest::default();
    if let Err(e) = client.update_balance_allowance(request.clone()).await {
        warn!(error = %e, "Failed to refresh balance/allowance cache");
    }

    let response = client
        .balance_allowance(request)
        .await
        .map_err(|e| TradingError::SubmissionFailed(format!("Failed to get balance: {}", e)))?;

    let balance = usdc_from_base_units(response.balance);
    debug!(balance = %balance, "Retrieved USDC balance");
    Ok(balance)
}

/// USDC has 6 decimals on Polygon.
fn usdc_from_base_units(units: Decimal) -> Decimal {
    units / Decimal::new(1_000_000, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn matched_submission_is_filled() {
        let params = OrderParams::sell("token", dec!(0.80), dec!(11.08));
        let result = interpret_submit(&params, "abc".to_string(), "Matched");
        assert_eq!(
            result,
            OrderResult::Filled {
                order_id: "abc".to_string(),
                price: dec!(0.80),
                size: dec!(11.08)
            }
        );
    }

    #[test]
    fn live_submission_is_pending() {
        let params = OrderParams::maker_buy("token", dec!(0.451), dec!(11.08));
        let result = interpret_submit(&params, "def".to_string(), "Live");
        assert_eq!(
            result,
            OrderResult::Pending {
                order_id: "def".to_string()
            }
        );
    }

    #[test]
    fn missing_order_id_is_rejection() {
        let params = OrderParams::maker_buy("token", dec!(0.451), dec!(11.08));
        assert!(matches!(
            interpret_submit(&params, String::new(), "Live"),
            OrderResult::Rejected { .. }
        ));
    }

    #[test]
    fn status_labels_from_the_sdk() {
        assert_eq!(parse_status("Live"), Some(OrderStatus::Live));
        assert_eq!(parse_status("MATCHED"), Some(OrderStatus::Filled));
        assert_eq!(parse_status("ORDER_STATUS_CANCELED"), Some(OrderStatus::Canceled));
        assert_eq!(parse_status("Unmatched"), Some(OrderStatus::Canceled));
        assert_eq!(parse_status("Delayed"), Some(OrderStatus::Pending));
        assert_eq!(parse_status("Bogus"), None);
    }

    #[test]
    fn order_state_reads_partial_fill() {
        let state = order_state("o1", "Live", dec!(4), dec!(11.08), dec!(0.451)).unwrap();
        assert_eq!(state.status, OrderStatus::Live);
        assert_eq!(state.filled_size, dec!(4));
        assert_eq!(state.original_size, dec!(11.08));
        assert_eq!(state.fill_price, Some(dec!(0.451)));
        assert!(!state.is_filled());

        let state = order_state("o1", "Canceled", dec!(0), dec!(11.08), dec!(0)).unwrap();
        assert_eq!(state.fill_price, None);
    }

    #[test]
    fn usdc_balance_scales_base_units() {
        assert_eq!(usdc_from_base_units(dec!(123450000)), dec!(123.45));
    }
}
