//! `Control` — the capability object an engine uses to request effects.
//!
//! Per spec §5, engine calls must not perform I/O themselves: `launch`
//! and `destroy_instances` only record an intent and synthesize the IDs
//! the engine needs to keep working, while the actual provisioner calls
//! happen afterward, outside the decide critical section. This mirrors
//! the existing placement-executor split between computing a plan
//! (synchronous, pure) and executing it (a separate I/O step).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub enum Intent {
    Launch {
        launch_id: String,
        instance_ids: Vec<String>,
        deployable_type: String,
        site: String,
        allocation: String,
        extravars: Option<HashMap<String, Option<String>>>,
    },
    Destroy {
        instance_ids: Vec<String>,
    },
}

pub struct Control {
    intents: Mutex<Vec<Intent>>,
    counter: AtomicU64,
}

impl Control {
    pub fn new() -> Self {
        Self {
            intents: Mutex::new(Vec::new()),
            counter: AtomicU64::new(0),
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}-{n}")
    }

    /// Records a launch intent and returns the `(launch_id, [instance_id])`
    /// pair the engine needs immediately to keep its own bookkeeping
    /// (e.g. the set of "valid" instances) consistent within the call.
    pub fn launch(
        &self,
        deployable_type: &str,
        site: &str,
        allocation: &str,
        extravars: Option<HashMap<String, Option<String>>>,
    ) -> (String, Vec<String>) {
        let launch_id = self.next_id("launch");
        let instance_id = self.next_id("inst");
        self.intents.lock().unwrap().push(Intent::Launch {
            launch_id: launch_id.clone(),
            instance_ids: vec![instance_id.clone()],
            deployable_type: deployable_type.to_string(),
            site: site.to_string(),
            allocation: allocation.to_string(),
            extravars,
        });
        (launch_id, vec![instance_id])
    }

    pub fn destroy_instances(&self, instance_ids: Vec<String>) {
        self.intents.lock().unwrap().push(Intent::Destroy { instance_ids });
    }

    /// Drains the recorded intents for execution outside the critical
    /// section. Called once per decide/initialize/reconfigure cycle.
    pub fn take_intents(&self) -> Vec<Intent> {
        std::mem::take(&mut self.intents.lock().unwrap())
    }
}

impl Default for Control {
    fn default() -> Self {
        Self::new()
    }
}
