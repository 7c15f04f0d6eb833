//! Deterministic in-process provider for tests and local development.
//!
//! The stub replays a script of label maps, one entry per call, repeating the
//! last entry once the script is exhausted. Bodies are synthesized in the
//! vendor's wire shape so stored responses decode exactly like real ones.

use super::{encode_body, Fetched, LabelProvider};
use crate::db::models::Service;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};

pub struct StubProvider {
    service: Service,
    script: Mutex<VecDeque<BTreeMap<String, f64>>>,
    last: Mutex<BTreeMap<String, f64>>,
    fail: Mutex<bool>,
}

impl StubProvider {
    pub fn new(service: Service) -> Self {
        Self {
            service,
            script: Mutex::new(VecDeque::new()),
            last: Mutex::new(BTreeMap::new()),
            fail: Mutex::new(false),
        }
    }

    /// Queue the label map returned by the next unscripted call.
    pub fn push(self, labels: &[(&str, f64)]) -> Self {
        let map: BTreeMap<String, f64> = labels.iter().map(|(n, c)| (n.to_string(), *c)).collect();
        self.script.lock().push_back(map);
        self
    }

    /// Make every subsequent call fail with a service error.
    pub fn fail_from_now_on(&self) {
        *self.fail.lock() = true;
    }

    fn next_labels(&self) -> BTreeMap<String, f64> {
        let mut script = self.script.lock();
        match script.pop_front() {
            Some(labels) => {
                *self.last.lock() = labels.clone();
                labels
            }
            None => self.last.lock().clone(),
        }
    }
}

#[async_trait]
impl LabelProvider for StubProvider {
    fn service(&self) -> Service {
        self.service
    }

    async fn fetch(&self, _uri: &str, max_labels: u32, min_confidence: f64) -> Fetched {
        if *self.fail.lock() {
            return Fetched::failure(&super::ProviderError::ServiceError("stubbed outage".to_string()));
        }

        let mut labels = self.next_labels();
        if self.service != Service::Azure {
            labels.retain(|_, confidence| *confidence >= min_confidence);
        }
        let labels = super::truncate_labels(labels, max_labels);

        Fetched {
            body: encode_body(self.service, &labels),
            success: true,
            labels,
        }
    }
}
