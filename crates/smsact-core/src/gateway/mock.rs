//! Scripted gateway for tests.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::{
    ActivationGateway, Availability, Balance, GatewayError, NewActivationRequest,
    RemoteActivation,
};

/// In-memory gateway with scripted responses and call recording.
///
/// Mutations performed through it (cancel, finalize) are reflected in
/// later `get_activation` snapshots, so poll-channel behavior can be
/// exercised end to end without a network.
#[derive(Debug, Default)]
pub struct MockActivationGateway {
    inner: Mutex<MockState>,
}

#[derive(Debug, Default)]
struct MockState {
    prices: HashMap<String, Vec<Availability>>,
    activations: HashMap<String, RemoteActivation>,
    balance: Balance,
    failures: Vec<(String, GatewayError)>,
    calls: Vec<String>,
    counter: u64,
    now: u64,
    ttl_secs: u64,
}

impl MockActivationGateway {
    /// Creates an empty mock. Synthesized activations are stamped with
    /// `created_at = 1_000` and a 900 second TTL unless configured
    /// otherwise.
    #[must_use]
    pub fn new() -> Self {
        let mock = Self::default();
        {
            let mut state = mock.state();
            state.now = 1_000;
            state.ttl_secs = 900;
        }
        mock
    }

    /// Sets the availability returned for `service_id`.
    #[must_use]
    pub fn with_prices(self, service_id: &str, prices: Vec<Availability>) -> Self {
        self.state().prices.insert(service_id.to_string(), prices);
        self
    }

    /// Sets the reported account balance.
    #[must_use]
    pub fn with_balance(self, balance: Balance) -> Self {
        self.state().balance = balance;
        self
    }

    /// Seeds a remote activation snapshot.
    pub fn insert_activation(&self, snapshot: RemoteActivation) {
        self.state()
            .activations
            .insert(snapshot.activation_id.clone(), snapshot);
    }

    /// Overwrites the raw status of a seeded snapshot, simulating remote
    /// progress between poll passes.
    pub fn set_remote_status(&self, id: &str, status: &str, sms_code: Option<&str>) {
        let mut state = self.state();
        if let Some(snapshot) = state.activations.get_mut(id) {
            snapshot.activation_status = status.to_string();
            if let Some(code) = sms_code {
                snapshot.sms_code = Some(code.to_string());
            }
        }
    }

    /// Makes the next gateway call fail with `error` (single shot).
    pub fn fail_next(&self, error: GatewayError) {
        self.fail_on("", error);
    }

    /// Makes the next call whose label starts with `prefix` fail with
    /// `error` (single shot). Labels look like `get_activation:act-1`.
    pub fn fail_on(&self, prefix: &str, error: GatewayError) {
        self.state().failures.push((prefix.to_string(), error));
    }

    /// Labels of every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self, label: String) -> Result<std::sync::MutexGuard<'_, MockState>, GatewayError> {
        let mut state = self.state();
        if let Some(index) = state
            .failures
            .iter()
            .position(|(prefix, _)| label.starts_with(prefix.as_str()))
        {
            let (_, error) = state.failures.remove(index);
            state.calls.push(label);
            return Err(error);
        }
        state.calls.push(label);
        Ok(state)
    }
}

impl ActivationGateway for MockActivationGateway {
    fn get_prices(&self, service_id: &str) -> Result<Vec<Availability>, GatewayError> {
        let state = self.begin(format!("get_prices:{service_id}"))?;
        Ok(state.prices.get(service_id).cloned().unwrap_or_default())
    }

    fn get_activation(&self, id: &str) -> Result<RemoteActivation, GatewayError> {
        let state = self.begin(format!("get_activation:{id}"))?;
        state
            .activations
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound { id: id.to_string() })
    }

    fn request_activation(
        &self,
        request: &NewActivationRequest,
    ) -> Result<RemoteActivation, GatewayError> {
        let mut state = self.begin(format!("request_activation:{}", request.order_id))?;
        state.counter += 1;
        let snapshot = RemoteActivation {
            activation_id: format!("act-mock-{}", state.counter),
            order_id: Some(request.order_id.clone()),
            phone: format!("+1555000{:04}", state.counter),
            service_id: request.service_id.clone(),
            country_id: request.country_id.clone(),
            activation_status: "pending".to_string(),
            sms_status: Some("none".to_string()),
            sms_code: None,
            sms_text: None,
            price: request.max_price,
            max_price: Some(request.max_price),
            created_at: state.now,
            updated_at: state.now,
            expire_at: state.now + state.ttl_secs,
            is_retriable: Some(false),
        };
        state
            .activations
            .insert(snapshot.activation_id.clone(), snapshot.clone());
        Ok(snapshot)
    }

    fn cancel_activation(&self, id: &str) -> Result<(), GatewayError> {
        let mut state = self.begin(format!("cancel_activation:{id}"))?;
        match state.activations.get_mut(id) {
            Some(snapshot) => {
                snapshot.activation_status = "canceled".to_string();
                Ok(())
            }
            None => Err(GatewayError::NotFound { id: id.to_string() }),
        }
    }

    fn finalize_activation(&self, id: &str) -> Result<(), GatewayError> {
        let mut state = self.begin(format!("finalize_activation:{id}"))?;
        match state.activations.get_mut(id) {
            Some(snapshot) => {
                snapshot.activation_status = "finalized".to_string();
                Ok(())
            }
            None => Err(GatewayError::NotFound { id: id.to_string() }),
        }
    }

    fn get_balance(&self) -> Result<Balance, GatewayError> {
        let state = self.begin("get_balance".to_string())?;
        Ok(state.balance)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::super::{PriceBand, QualityScore};
    use super::*;

    fn availability(country: &str, min: f64) -> Availability {
        Availability {
            country_id: country.to_string(),
            price: PriceBand {
                min,
                max: min * 2.0,
                suggested: min,
            },
            count: 10,
            quality: Some(QualityScore { avg: 0.8 }),
        }
    }

    #[test]
    fn scripted_prices_are_returned() {
        let gateway =
            MockActivationGateway::new().with_prices("svc-wa", vec![availability("us", 0.3)]);
        let prices = gateway.get_prices("svc-wa").unwrap();
        assert_eq!(prices.len(), 1);
        assert_eq!(prices[0].country_id, "us");

        assert!(gateway.get_prices("svc-other").unwrap().is_empty());
    }

    #[test]
    fn request_creates_a_pending_snapshot() {
        let gateway = MockActivationGateway::new();
        let snapshot = gateway
            .request_activation(&NewActivationRequest {
                service_id: "svc-wa".to_string(),
                country_id: "us".to_string(),
                max_price: 0.5,
                order_id: "ord-1".to_string(),
            })
            .unwrap();
        assert_eq!(snapshot.activation_status, "pending");
        assert_eq!(snapshot.order_id.as_deref(), Some("ord-1"));
        assert!(snapshot.expire_at > snapshot.created_at);

        // The snapshot is fetchable afterwards.
        let fetched = gateway.get_activation(&snapshot.activation_id).unwrap();
        assert_eq!(fetched, snapshot);
    }

    #[test]
    fn unknown_activation_is_not_found() {
        let gateway = MockActivationGateway::new();
        let result = gateway.get_activation("act-ghost");
        assert!(matches!(result, Err(GatewayError::NotFound { .. })));
    }

    #[test]
    fn injected_failure_fires_once() {
        let gateway = MockActivationGateway::new();
        gateway.fail_next(GatewayError::RateLimited { retry_after: None });
        assert!(gateway.get_balance().is_err());
        assert!(gateway.get_balance().is_ok());
    }

    #[test]
    fn cancel_and_finalize_mutate_the_snapshot() {
        let gateway = MockActivationGateway::new();
        let snapshot = gateway
            .request_activation(&NewActivationRequest {
                service_id: "svc-wa".to_string(),
                country_id: "us".to_string(),
                max_price: 0.5,
                order_id: "ord-1".to_string(),
            })
            .unwrap();

        gateway.cancel_activation(&snapshot.activation_id).unwrap();
        let fetched = gateway.get_activation(&snapshot.activation_id).unwrap();
        assert_eq!(fetched.activation_status, "canceled");
    }

    #[test]
    fn calls_are_recorded_in_order() {
        let gateway = MockActivationGateway::new();
        let _ = gateway.get_prices("svc-wa");
        let _ = gateway.get_balance();
        assert_eq!(gateway.calls(), ["get_prices:svc-wa", "get_balance"]);
    }
}
