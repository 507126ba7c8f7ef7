//! MongoDB-backed trace storage.
//!
//! Optional values (span params/results, event payloads) are stored as JSON
//! text so that "not captured" (field absent) survives a round trip distinct
//! from a captured `null`.

use std::thread;

use mongodb::bson::{doc, Document};
use mongodb::options::{FindOptions, IndexOptions, ReplaceOptions};
use mongodb::sync::{Client, Collection};
use mongodb::IndexModel;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use traced_core::{
    ArtifactRecord, ArtifactType, ErrorInfo, EventRecord, SpanRecord, Status, TraceQuery,
    TraceRecord,
};

use crate::{StoreError, TraceStore};

/// Collection names used by [`MongoStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MongoCollections {
    pub traces: String,
    pub spans: String,
    pub events: String,
    pub artifacts: String,
}

impl Default for MongoCollections {
    fn default() -> Self {
        Self {
            traces: "traces".to_string(),
            spans: "trace_spans".to_string(),
            events: "trace_events".to_string(),
            artifacts: "trace_artifacts".to_string(),
        }
    }
}

/// Document store shared by any number of writer processes.
pub struct MongoStore {
    traces: Collection<TraceDoc>,
    spans: Collection<SpanDoc>,
    events: Collection<EventDoc>,
    artifacts: Collection<ArtifactDoc>,
}

impl MongoStore {
    /// Connects to `uri` and ensures the lookup indexes exist.
    pub fn connect(
        uri: &str,
        database: &str,
        collections: &MongoCollections,
    ) -> Result<Self, StoreError> {
        let store = off_runtime(|| {
            let client = Client::with_uri_str(uri)?;
            let db = client.database(database);
            let store = Self {
                traces: db.collection(&collections.traces),
                spans: db.collection(&collections.spans),
                events: db.collection(&collections.events),
                artifacts: db.collection(&collections.artifacts),
            };
            store.ensure_indexes()?;
            Ok(store)
        })?;
        info!("Connected to MongoDB trace store at {}, database {}", uri, database);
        Ok(store)
    }

    /// Record ids and the artifact `(span_id, name)` key are unique, so
    /// concurrent upserts from separate processes cannot duplicate a document.
    fn ensure_indexes(&self) -> Result<(), StoreError> {
        self.traces.create_index(unique_index(doc! { "trace_id": 1 }), None)?;
        self.traces.create_index(lookup_index(doc! { "start_time": 1 }), None)?;
        self.spans.create_index(unique_index(doc! { "span_id": 1 }), None)?;
        self.spans.create_index(lookup_index(doc! { "trace_id": 1 }), None)?;
        self.events.create_index(lookup_index(doc! { "trace_id": 1 }), None)?;
        self.events.create_index(lookup_index(doc! { "span_id": 1 }), None)?;
        self.artifacts.create_index(lookup_index(doc! { "trace_id": 1 }), None)?;
        self.artifacts
            .create_index(unique_index(doc! { "span_id": 1, "name": 1 }), None)?;
        Ok(())
    }
}

fn lookup_index(keys: Document) -> IndexModel {
    IndexModel::builder().keys(keys).build()
}

fn unique_index(keys: Document) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().unique(true).build())
        .build()
}

impl TraceStore for MongoStore {
    fn backend(&self) -> &'static str {
        "mongodb"
    }

    fn insert_trace(&self, trace: &TraceRecord) -> Result<(), StoreError> {
        off_runtime(|| {
            self.traces.insert_one(TraceDoc::from_record(trace), None)?;
            Ok(())
        })
    }

    fn close_trace(&self, trace_id: &str, end_time: i64, status: Status) -> Result<(), StoreError> {
        off_runtime(|| {
            let result = self.traces.update_one(
                doc! { "trace_id": trace_id },
                doc! { "$set": { "end_time": end_time, "status": status.as_str() } },
                None,
            )?;
            if result.matched_count == 0 {
                return Err(StoreError::NotFound(format!("trace {}", trace_id)));
            }
            Ok(())
        })
    }

    fn insert_span(&self, span: &SpanRecord) -> Result<(), StoreError> {
        off_runtime(|| {
            self.spans.insert_one(SpanDoc::from_record(span)?, None)?;
            Ok(())
        })
    }

    fn finish_span(&self, span: &SpanRecord) -> Result<(), StoreError> {
        off_runtime(|| {
            let result = self.spans.replace_one(
                doc! { "span_id": span.span_id.as_str() },
                SpanDoc::from_record(span)?,
                None,
            )?;
            if result.matched_count == 0 {
                return Err(StoreError::NotFound(format!("span {}", span.span_id)));
            }
            Ok(())
        })
    }

    fn insert_event(&self, event: &EventRecord) -> Result<(), StoreError> {
        off_runtime(|| {
            self.events.insert_one(EventDoc::from_record(event)?, None)?;
            Ok(())
        })
    }

    fn save_artifact(&self, artifact: &ArtifactRecord) -> Result<(), StoreError> {
        off_runtime(|| {
            let mut options = ReplaceOptions::default();
            options.upsert = Some(true);
            self.artifacts.replace_one(
                doc! { "span_id": artifact.span_id.as_str(), "name": artifact.name.as_str() },
                ArtifactDoc::from_record(artifact)?,
                options,
            )?;
            Ok(())
        })
    }

    fn get_trace(&self, trace_id: &str) -> Result<Option<TraceRecord>, StoreError> {
        off_runtime(|| {
            let found = self.traces.find_one(doc! { "trace_id": trace_id }, None)?;
            Ok(found.map(TraceDoc::into_record))
        })
    }

    fn list_traces(&self, query: &TraceQuery) -> Result<Vec<TraceRecord>, StoreError> {
        off_runtime(|| {
            let mut filter = Document::new();
            if let Some(ref agent) = query.root_agent {
                filter.insert("root_agent", agent.as_str());
            }
            if let Some(status) = query.status {
                filter.insert("status", status.as_str());
            }

            // `_id` grows with insertion, which breaks start time ties.
            let mut options = FindOptions::default();
            options.sort = Some(doc! { "start_time": 1, "_id": 1 });
            options.skip = query.offset.map(u64::from);
            options.limit = query.limit.map(i64::from);

            let mut traces = Vec::new();
            for found in self.traces.find(filter, options)? {
                traces.push(found?.into_record());
            }
            Ok(traces)
        })
    }

    fn get_spans(&self, trace_id: &str) -> Result<Vec<SpanRecord>, StoreError> {
        off_runtime(|| {
            let options = sorted_by(doc! { "start_time": 1, "seq": 1 });

            let mut spans = Vec::new();
            for found in self.spans.find(doc! { "trace_id": trace_id }, options)? {
                spans.push(found?.into_record()?);
            }
            Ok(spans)
        })
    }

    fn get_events(&self, trace_id: &str) -> Result<Vec<EventRecord>, StoreError> {
        off_runtime(|| {
            let options = sorted_by(doc! { "timestamp": 1, "seq": 1 });

            let mut events = Vec::new();
            for found in self.events.find(doc! { "trace_id": trace_id }, options)? {
                events.push(found?.into_record()?);
            }
            Ok(events)
        })
    }

    fn get_artifacts(&self, trace_id: &str) -> Result<Vec<ArtifactRecord>, StoreError> {
        off_runtime(|| {
            let options = sorted_by(doc! { "created_at": 1, "name": 1 });

            let mut artifacts = Vec::new();
            for found in self.artifacts.find(doc! { "trace_id": trace_id }, options)? {
                artifacts.push(found?.into_record()?);
            }
            Ok(artifacts)
        })
    }

    fn span_count(&self, trace_id: &str) -> Result<u64, StoreError> {
        off_runtime(|| {
            Ok(self
                .spans
                .count_documents(doc! { "trace_id": trace_id }, None)?)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TraceDoc {
    trace_id: String,
    root_agent: String,
    start_time: i64,
    end_time: Option<i64>,
    status: String,
}

impl TraceDoc {
    fn from_record(trace: &TraceRecord) -> Self {
        Self {
            trace_id: trace.trace_id.clone(),
            root_agent: trace.root_agent.clone(),
            start_time: trace.start_time,
            end_time: trace.end_time,
            status: trace.status.as_str().to_string(),
        }
    }

    fn into_record(self) -> TraceRecord {
        TraceRecord {
            trace_id: self.trace_id,
            root_agent: self.root_agent,
            start_time: self.start_time,
            end_time: self.end_time,
            status: Status::from_str(&self.status),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SpanDoc {
    span_id: String,
    trace_id: String,
    parent_span_id: Option<String>,
    name: String,
    component: Option<String>,
    start_time: i64,
    end_time: Option<i64>,
    status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ErrorInfo>,
    seq: i64,
}

impl SpanDoc {
    fn from_record(span: &SpanRecord) -> Result<Self, StoreError> {
        Ok(Self {
            span_id: span.span_id.clone(),
            trace_id: span.trace_id.clone(),
            parent_span_id: span.parent_span_id.clone(),
            name: span.name.clone(),
            component: span.component.clone(),
            start_time: span.start_time,
            end_time: span.end_time,
            status: span.status.as_str().to_string(),
            params: to_json(span.params.as_ref())?,
            result: to_json(span.result.as_ref())?,
            error: span.error.clone(),
            seq: span.seq,
        })
    }

    fn into_record(self) -> Result<SpanRecord, StoreError> {
        Ok(SpanRecord {
            span_id: self.span_id,
            trace_id: self.trace_id,
            parent_span_id: self.parent_span_id,
            name: self.name,
            component: self.component,
            start_time: self.start_time,
            end_time: self.end_time,
            status: Status::from_str(&self.status),
            params: from_json(self.params)?,
            result: from_json(self.result)?,
            error: self.error,
            seq: self.seq,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct EventDoc {
    event_id: String,
    span_id: String,
    trace_id: String,
    timestamp: i64,
    seq: i64,
    label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
}

impl EventDoc {
    fn from_record(event: &EventRecord) -> Result<Self, StoreError> {
        Ok(Self {
            event_id: event.event_id.clone(),
            span_id: event.span_id.clone(),
            trace_id: event.trace_id.clone(),
            timestamp: event.timestamp,
            seq: event.seq,
            label: event.label.clone(),
            payload: to_json(event.payload.as_ref())?,
        })
    }

    fn into_record(self) -> Result<EventRecord, StoreError> {
        Ok(EventRecord {
            event_id: self.event_id,
            span_id: self.span_id,
            trace_id: self.trace_id,
            timestamp: self.timestamp,
            seq: self.seq,
            label: self.label,
            payload: from_json(self.payload)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ArtifactDoc {
    artifact_id: String,
    span_id: String,
    trace_id: String,
    name: String,
    artifact_type: String,
    payload: String,
    created_at: i64,
}

impl ArtifactDoc {
    fn from_record(artifact: &ArtifactRecord) -> Result<Self, StoreError> {
        Ok(Self {
            artifact_id: artifact.artifact_id.clone(),
            span_id: artifact.span_id.clone(),
            trace_id: artifact.trace_id.clone(),
            name: artifact.name.clone(),
            artifact_type: artifact.artifact_type.as_str().to_string(),
            payload: serde_json::to_string(&artifact.payload)?,
            created_at: artifact.created_at,
        })
    }

    fn into_record(self) -> Result<ArtifactRecord, StoreError> {
        Ok(ArtifactRecord {
            artifact_id: self.artifact_id,
            span_id: self.span_id,
            trace_id: self.trace_id,
            name: self.name,
            artifact_type: ArtifactType::from_str(&self.artifact_type),
            payload: serde_json::from_str(&self.payload)?,
            created_at: self.created_at,
        })
    }
}

fn sorted_by(sort: Document) -> FindOptions {
    let mut options = FindOptions::default();
    options.sort = Some(sort);
    options
}

/// Runs a driver call where the sync driver can block.
///
/// The sync driver blocks on its own runtime, which panics when entered from
/// a thread already driving tokio; such calls move to a scoped thread.
fn off_runtime<T, F>(op: F) -> Result<T, StoreError>
where
    T: Send,
    F: FnOnce() -> Result<T, StoreError> + Send,
{
    if tokio::runtime::Handle::try_current().is_err() {
        return op();
    }
    thread::scope(|scope| scope.spawn(op).join())
        .unwrap_or_else(|_| Err(StoreError::Unavailable("MongoDB call panicked".to_string())))
}

fn to_json(value: Option<&Value>) -> Result<Option<String>, StoreError> {
    Ok(value.map(serde_json::to_string).transpose()?)
}

fn from_json(text: Option<String>) -> Result<Option<Value>, StoreError> {
    Ok(text.map(|t| serde_json::from_str(&t)).transpose()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance;
    use serde_json::json;

    #[test]
    fn test_span_doc_keeps_capture_distinction() {
        let mut span = conformance::span("t1", "s1", None, 10, 1);
        span.result = Some(Value::Null);
        span.error = Some(ErrorInfo::new("ValueError", "x"));

        let doc = SpanDoc::from_record(&span).unwrap();
        assert_eq!(doc.params, None);
        assert_eq!(doc.result.as_deref(), Some("null"));

        let bson = mongodb::bson::to_document(&doc).unwrap();
        assert!(!bson.contains_key("params"));

        let back: SpanDoc = mongodb::bson::from_document(bson).unwrap();
        assert_eq!(back.into_record().unwrap(), span);
    }

    #[test]
    fn test_event_and_artifact_docs_round_trip() {
        let event = conformance::event("t1", "s1", "step1_started", 5, 2, Some(json!({"k": 1})));
        let back = EventDoc::from_record(&event).unwrap().into_record().unwrap();
        assert_eq!(back, event);

        let artifact = conformance::artifact("t1", "s1", "input", json!([1, "two"]), 7);
        let back = ArtifactDoc::from_record(&artifact)
            .unwrap()
            .into_record()
            .unwrap();
        assert_eq!(back, artifact);
    }

    #[test]
    fn test_identity_indexes_are_unique() {
        let artifact_key = unique_index(doc! { "span_id": 1, "name": 1 });
        assert_eq!(artifact_key.keys, doc! { "span_id": 1, "name": 1 });
        assert_eq!(artifact_key.options.and_then(|o| o.unique), Some(true));

        let lookup = lookup_index(doc! { "trace_id": 1 });
        assert!(lookup.options.is_none());
    }

    #[test]
    fn test_default_collections() {
        let collections = MongoCollections::default();
        assert_eq!(collections.events, "trace_events");
        assert_eq!(collections.artifacts, "trace_artifacts");
    }

    /// Runs against a live server when `TRACED_TEST_MONGODB_URI` is set.
    #[test]
    fn test_mongo_round_trip_live() {
        let Ok(uri) = std::env::var("TRACED_TEST_MONGODB_URI") else {
            return;
        };
        let database = format!("traced_test_{}", traced_core::new_id().replace('-', ""));
        let store = MongoStore::connect(&uri, &database, &MongoCollections::default()).unwrap();
        conformance::round_trip(&store);

        let collections = MongoCollections {
            traces: "overwrite_traces".to_string(),
            spans: "overwrite_spans".to_string(),
            events: "overwrite_events".to_string(),
            artifacts: "overwrite_artifacts".to_string(),
        };
        let store = MongoStore::connect(&uri, &database, &collections).unwrap();
        conformance::artifact_overwrite(&store);

        // Racing upserts of one artifact name leave a single document.
        let collections = MongoCollections {
            traces: "race_traces".to_string(),
            spans: "race_spans".to_string(),
            events: "race_events".to_string(),
            artifacts: "race_artifacts".to_string(),
        };
        let writers: Vec<_> = (0..4)
            .map(|i| MongoStore::connect(&uri, &database, &collections).map(|s| (i, s)))
            .collect::<Result<_, _>>()
            .unwrap();
        thread::scope(|scope| {
            for (i, writer) in &writers {
                scope.spawn(move || {
                    let artifact = conformance::artifact("race", "s1", "shared", json!(i), *i);
                    // A losing racer may see a duplicate key error; the winner's write stands.
                    let _ = writer.save_artifact(&artifact);
                });
            }
        });
        let artifacts = writers[0].1.get_artifacts("race").unwrap();
        assert_eq!(artifacts.len(), 1);

        let span = conformance::span("race", "s1", None, 1, 1);
        writers[0].1.insert_span(&span).unwrap();
        assert!(writers[1].1.insert_span(&span).is_err());
    }
}
