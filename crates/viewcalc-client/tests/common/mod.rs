#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use viewcalc_client::{SessionConfig, ViewClient};
use viewcalc_common::{TargetRef, Value};
use viewcalc_engine::test_view::{CONFIG, TestPortfolio, present_value};
use viewcalc_engine::{
    CycleCompletion, CycleId, DeltaResultModel, EngineConfig, ResultModel, ViewProcess,
};

pub const TIMEOUT: Duration = Duration::from_secs(10);

pub fn start(portfolio: &TestPortfolio) -> Arc<ViewProcess> {
    Arc::new(
        portfolio
            .start(EngineConfig::default())
            .expect("process starts"),
    )
}

pub fn attach(process: &Arc<ViewProcess>) -> ViewClient {
    ViewClient::attach(process.clone(), SessionConfig::default()).expect("session attaches")
}

pub fn run_cycle(process: &ViewProcess) -> CycleCompletion {
    let next = process.next_cycle(false);
    process.trigger_cycle().expect("trigger");
    next.wait(TIMEOUT).expect("cycle completes")
}

/// Poll `condition` until it holds or the timeout passes.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub fn at(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}

/// Result model holding present values for the given positions or nodes.
pub fn pv_model(cycle: u64, millis: i64, values: &[(TargetRef, Value)]) -> ResultModel {
    let mut model = ResultModel::new(CycleId(cycle), at(millis)).with_result_timestamp(at(millis));
    for (target, value) in values {
        model.add_value(CONFIG, present_value(target.clone()), value.clone());
    }
    model
}

#[derive(Default)]
pub struct Collected {
    pub full: Mutex<Vec<Arc<ResultModel>>>,
    pub deltas: Mutex<Vec<Arc<DeltaResultModel>>>,
}

impl Collected {
    pub fn attach_to(self: &Arc<Self>, client: &ViewClient) {
        let full = self.clone();
        client.set_result_listener(Some(Arc::new(move |r: &Arc<ResultModel>| {
            full.full.lock().push(r.clone())
        })));
        let deltas = self.clone();
        client.set_delta_listener(Some(Arc::new(move |d: &Arc<DeltaResultModel>| {
            deltas.deltas.lock().push(d.clone())
        })));
    }

    pub fn full_count(&self) -> usize {
        self.full.lock().len()
    }

    pub fn cycle_ids(&self) -> Vec<CycleId> {
        self.full.lock().iter().map(|r| r.cycle_id()).collect()
    }
}
