use crate::model::{
    in_light_band, Action, ExchangeKv, INDEX_LIGHT_END, INDEX_LIGHT_START, INDEX_SCENARIO,
};
use crate::store::ExchangeStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

// The device silently drops a block touching 605..=622 unless it carries
// the whole band plus the scenario trigger.
#[derive(Debug, Clone)]
pub struct ActionProcessor {
    store: Arc<ExchangeStore>,
}

impl ActionProcessor {
    pub fn new(store: Arc<ExchangeStore>) -> Self {
        Self { store }
    }

    pub fn add_action(&self, client: &str, params: Vec<ExchangeKv>) -> String {
        let params = generate_complete_block(fuse_duplicates(params));
        let action = Action {
            guid: Uuid::new_v4().to_string(),
            params,
        };
        let guid = action.guid.clone();
        tracing::debug!(
            client = %client,
            guid = %guid,
            params = action.params.len(),
            "action queued"
        );
        self.store.enqueue_action(client, action);
        guid
    }
}

pub fn generate_complete_block(params: Vec<ExchangeKv>) -> Vec<ExchangeKv> {
    if !params.iter().any(|p| in_light_band(p.k)) {
        return params;
    }

    let mut block: BTreeMap<i32, String> = params.into_iter().map(|p| (p.k, p.v)).collect();
    block
        .entry(INDEX_SCENARIO)
        .or_insert_with(|| "1".to_string());
    for index in INDEX_LIGHT_START..=INDEX_LIGHT_END {
        block.entry(index).or_insert_with(|| "0".to_string());
    }

    block
        .into_iter()
        .map(|(k, v)| ExchangeKv { k, v })
        .collect()
}

pub fn bitwise_fusion(index: i32, existing: &str, new: &str) -> String {
    if index == INDEX_SCENARIO {
        return new.to_string();
    }
    match (existing.parse::<i64>(), new.parse::<i64>()) {
        (Ok(a), Ok(b)) => (a | b).to_string(),
        _ => new.to_string(),
    }
}

fn fuse_duplicates(params: Vec<ExchangeKv>) -> Vec<ExchangeKv> {
    let mut fused: Vec<ExchangeKv> = Vec::with_capacity(params.len());
    for param in params {
        match fused.iter_mut().find(|p| p.k == param.k) {
            Some(existing) => existing.v = bitwise_fusion(param.k, &existing.v, &param.v),
            None => fused.push(param),
        }
    }
    fused
}
