//! Demo handlers wired by the `spindle` binary.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};

use spindle_core::{HandlerError, Params, TaskHandler, TaskType};

/// Answers `ping` with `{"pong": true}`.
pub struct PingHandler;

#[async_trait]
impl TaskHandler for PingHandler {
    async fn execute(
        &self,
        _task_type: &TaskType,
        _params: &Params,
    ) -> Result<Value, HandlerError> {
        Ok(json!({ "pong": true }))
    }
}

const PROTOCOLS: &[&str] = &["uniswap_v3", "aave_v3", "compound_v3", "curve", "sushiswap"];
const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Serialize)]
struct ProtocolMetrics {
    protocol: String,
    tvl: f64,
    volume_24h: f64,
    apy: f64,
    risk_score: f64,
}

impl ProtocolMetrics {
    /// Canned figures standing in for an RPC lookup.
    fn sample(protocol: &str) -> Self {
        let (tvl, volume_24h, apy, risk_score) = match protocol {
            "uniswap_v3" => (2.5e9, 8.0e8, 0.125, 3.2),
            "aave_v3" => (5.2e9, 4.5e8, 0.085, 2.1),
            "compound_v3" => (2.1e9, 1.5e8, 0.072, 1.9),
            "curve" => (3.8e9, 3.2e8, 0.095, 2.8),
            "sushiswap" => (4.5e8, 9.0e7, 0.14, 4.1),
            _ => (0.0, 0.0, 0.0, 0.0),
        };
        Self {
            protocol: protocol.to_string(),
            tvl,
            volume_24h,
            apy,
            risk_score,
        }
    }

    fn risk_adjusted_yield(&self) -> f64 {
        self.apy / (self.risk_score + 1.0)
    }
}

/// Protocol analytics under `defi.*`, with a per-protocol metrics cache.
///
/// Workers call this concurrently, so the cache carries its own lock.
pub struct DefiHandler {
    cache: Mutex<HashMap<String, (Instant, ProtocolMetrics)>>,
}

impl DefiHandler {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn metrics(&self, protocol: &str) -> ProtocolMetrics {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((fetched, metrics)) = cache.get(protocol)
            && fetched.elapsed() < CACHE_TTL
        {
            return metrics.clone();
        }
        let metrics = ProtocolMetrics::sample(protocol);
        cache.insert(protocol.to_string(), (Instant::now(), metrics.clone()));
        metrics
    }

    fn protocol_metrics(&self, params: &Params) -> Result<Value, HandlerError> {
        let protocol = params
            .get("protocol")
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerError::invalid_params("missing string param 'protocol'"))?;
        if !PROTOCOLS.contains(&protocol) {
            return Err(HandlerError::invalid_params(format!(
                "unsupported protocol '{protocol}'"
            )));
        }
        Ok(json!(self.metrics(protocol)))
    }

    fn yield_opportunities(&self) -> Value {
        let mut ranked: Vec<_> = PROTOCOLS.iter().map(|p| self.metrics(p)).collect();
        ranked.sort_by(|a, b| b.risk_adjusted_yield().total_cmp(&a.risk_adjusted_yield()));
        let opportunities: Vec<_> = ranked
            .iter()
            .map(|m| {
                json!({
                    "protocol": m.protocol,
                    "apy": m.apy,
                    "risk_score": m.risk_score,
                    "risk_adjusted_yield": m.risk_adjusted_yield(),
                    "tvl": m.tvl,
                })
            })
            .collect();
        json!({ "opportunities": opportunities })
    }

    fn health(&self) -> Value {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let cached: Vec<_> = PROTOCOLS.iter().filter(|p| cache.contains_key(**p)).collect();
        json!({
            "status": "healthy",
            "supported_protocols": PROTOCOLS,
            "cached_protocols": cached,
        })
    }
}

#[async_trait]
impl TaskHandler for DefiHandler {
    fn capabilities(&self) -> Vec<TaskType> {
        ["defi.protocol_metrics", "defi.yield_opportunities", "defi.health"]
            .into_iter()
            .map(TaskType::new)
            .collect()
    }

    async fn execute(&self, task_type: &TaskType, params: &Params) -> Result<Value, HandlerError> {
        match task_type.as_str() {
            "defi.protocol_metrics" => self.protocol_metrics(params),
            "defi.yield_opportunities" => Ok(self.yield_opportunities()),
            "defi.health" => Ok(self.health()),
            other => Err(HandlerError::permanent(format!("unsupported task type '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(protocol: &str) -> Params {
        let mut params = Params::new();
        params.insert("protocol".into(), json!(protocol));
        params
    }

    #[tokio::test]
    async fn protocol_metrics_are_cached() {
        let handler = DefiHandler::new();
        let task_type = TaskType::new("defi.protocol_metrics");

        let first = handler.execute(&task_type, &params("aave_v3")).await.unwrap();
        assert_eq!(first["tvl"], json!(5.2e9));

        handler.execute(&task_type, &params("aave_v3")).await.unwrap();
        let health = handler
            .execute(&TaskType::new("defi.health"), &Params::new())
            .await
            .unwrap();
        assert_eq!(health["cached_protocols"], json!(["aave_v3"]));
    }

    #[test]
    fn every_supported_protocol_has_figures() {
        for protocol in PROTOCOLS {
            let metrics = ProtocolMetrics::sample(protocol);
            assert!(metrics.tvl > 0.0, "{protocol}");
            assert!(metrics.apy > 0.0, "{protocol}");
            assert!(metrics.risk_score > 0.0, "{protocol}");
        }
    }

    #[tokio::test]
    async fn unknown_protocol_is_invalid_params() {
        let handler = DefiHandler::new();
        let err = handler
            .execute(&TaskType::new("defi.protocol_metrics"), &params("made_up"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, spindle_core::ErrorKind::InvalidParams);
    }

    #[tokio::test]
    async fn opportunities_are_ranked_by_risk_adjusted_yield() {
        let handler = DefiHandler::new();
        let out = handler
            .execute(&TaskType::new("defi.yield_opportunities"), &Params::new())
            .await
            .unwrap();
        let ranked = out["opportunities"].as_array().unwrap();
        assert_eq!(ranked.len(), PROTOCOLS.len());
        assert_eq!(ranked[0]["protocol"], "uniswap_v3");
        let yields: Vec<f64> = ranked
            .iter()
            .map(|o| o["risk_adjusted_yield"].as_f64().unwrap())
            .collect();
        assert!(yields.windows(2).all(|w| w[0] >= w[1]));
    }
}
