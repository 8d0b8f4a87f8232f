//! External gas price oracles, in gwei.

use serde::Deserialize;

use crate::error::{Error, Result};

const ETHGASSTATION_URL: &str = "https://api.ethgasstation.info/api/fee-estimate";
const GASNOW_URL: &str = "https://beaconcha.in/api/v1/execution/gasnow";

#[derive(Debug, Deserialize)]
struct FeeEstimateResponse {
    #[serde(rename = "baseFee")]
    base_fee: u64,
    #[serde(rename = "priorityFee")]
    priority_fee: PriorityFee,
}

#[derive(Debug, Deserialize)]
struct PriorityFee {
    fast: u64,
}

#[derive(Debug, Deserialize)]
struct GasNowResponse {
    data: GasNowData,
}

#[derive(Debug, Deserialize)]
struct GasNowData {
    standard: u64,
}

/// Returns `(baseFee, priorityFee.fast)` from ethgasstation.
pub async fn from_ethgasstation(http: &reqwest::Client) -> Result<(u64, u64)> {
    let response = http.get(ETHGASSTATION_URL).send().await?;
    if !response.status().is_success() {
        return Err(Error::GasOracle(format!(
            "ethgasstation status {}",
            response.status()
        )));
    }
    let estimate: FeeEstimateResponse = response.json().await?;
    Ok((estimate.base_fee, estimate.priority_fee.fast))
}

/// Returns the standard gas price from the beaconcha.in gasnow api.
pub async fn from_beaconchain(http: &reqwest::Client) -> Result<u64> {
    let response = http.get(GASNOW_URL).send().await?;
    if !response.status().is_success() {
        return Err(Error::GasOracle(format!(
            "gasnow status {}",
            response.status()
        )));
    }
    let gasnow: GasNowResponse = response.json().await?;
    Ok(gasnow.data.standard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fee_estimate() {
        let raw = r#"{
            "baseFee": 23,
            "blockNumber": 18000000,
            "blockTime": 12.1,
            "gasPrice": {"fast": 30, "instant": 35, "standard": 25},
            "nextBaseFee": 24,
            "priorityFee": {"fast": 2, "instant": 3, "standard": 1}
        }"#;
        let parsed: FeeEstimateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.base_fee, 23);
        assert_eq!(parsed.priority_fee.fast, 2);
    }

    #[test]
    fn parses_gasnow() {
        let raw = r#"{"code": 200, "data": {"rapid": 40000000000, "fast": 30000000000, "standard": 25, "slow": 20, "timestamp": 1700000000, "priceUSD": 2000.0}}"#;
        let parsed: GasNowResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.data.standard, 25);
    }
}
