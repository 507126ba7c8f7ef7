//! Traces a method-based processor, a free function and an explicit span,
//! then prints what was recorded.
//!
//! Run with: cargo run --example simple_usage

use std::collections::BTreeMap;

use traced::prelude::*;
use traced::{TraceQuery, TraceStore};

struct DataProcessor;

impl Traced for DataProcessor {}

#[traced_methods]
impl DataProcessor {
    pub fn process(&self, data: BTreeMap<String, String>) -> BTreeMap<String, String> {
        self.save_artifact("input_data", &data);
        let result = self.transform(&data);
        self.save_artifact("processed_data", &result);
        result
    }

    // Private, so not traced.
    fn transform(&self, data: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        data.iter()
            .map(|(k, v)| (k.to_uppercase(), v.to_uppercase()))
            .collect()
    }
}

#[traced]
fn calculate_average(numbers: Vec<f64>) -> f64 {
    numbers.iter().sum::<f64>() / numbers.len() as f64
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    configure_tracing(&TracingConfig::memory())?;

    let data = BTreeMap::from([("name".to_string(), "alice".to_string())]);
    println!("processed: {:?}", DataProcessor.process(data));
    println!("average: {}", calculate_average(vec![1.0, 2.0, 3.0, 4.0]));

    in_span("batch_job", |job| {
        job.add_event("loading", None);
        let loaded = calculate_average(vec![10.0, 20.0]);
        job.set_result(&loaded);
    });

    let store = traced::store();
    for trace in store.list_traces(&TraceQuery::default())? {
        println!(
            "\ntrace {} ({}) status={}",
            trace.trace_id,
            trace.root_agent,
            trace.status.as_str()
        );
        for span in store.get_spans(&trace.trace_id)? {
            println!(
                "  span {} parent={:?} result={:?}",
                span.name, span.parent_span_id, span.result
            );
        }
        for artifact in store.get_artifacts(&trace.trace_id)? {
            println!("  artifact {} = {}", artifact.name, artifact.payload);
        }
    }
    Ok(())
}
