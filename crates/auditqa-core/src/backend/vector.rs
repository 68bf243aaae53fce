//! Qdrant vector store client

use super::{FilterCondition, VectorBackend, VectorFilter, VectorHit};
use crate::config::VectorConfig;
use crate::error::Result;
use async_trait::async_trait;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    condition::ConditionOneOf, point_id::PointIdOptions, r#match::MatchValue, Condition,
    FieldCondition, Filter, Match, RepeatedStrings, SearchParams, SearchPointsBuilder,
};
use qdrant_client::Qdrant;
use std::time::Duration;

pub struct QdrantVectorBackend {
    client: Qdrant,
    hnsw_ef: Option<u64>,
}

impl QdrantVectorBackend {
    pub fn new(config: &VectorConfig) -> Result<Self> {
        let client = Qdrant::from_url(&config.url)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            hnsw_ef: config.hnsw_ef,
        })
    }
}

fn field_condition(key: String, value: MatchValue) -> Condition {
    Condition {
        condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
            key,
            r#match: Some(Match {
                match_value: Some(value),
            }),
            ..Default::default()
        })),
    }
}

fn into_qdrant(filter: &VectorFilter) -> Filter {
    let must = filter
        .conditions
        .iter()
        .map(|c| match c {
            FilterCondition::Eq(field, value) => {
                field_condition(field.clone(), MatchValue::Keyword(value.clone()))
            }
            FilterCondition::AnyOf(field, values) => field_condition(
                field.clone(),
                MatchValue::Keywords(RepeatedStrings {
                    strings: values.clone(),
                }),
            ),
        })
        .collect();
    Filter {
        must,
        ..Default::default()
    }
}

fn payload_to_json(payload: std::collections::HashMap<String, qdrant_client::qdrant::Value>) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (key, value) in payload {
        let json = match value.kind {
            Some(Kind::StringValue(s)) => serde_json::Value::String(s),
            Some(Kind::IntegerValue(i)) => serde_json::Value::from(i),
            Some(Kind::DoubleValue(d)) => serde_json::Value::from(d),
            Some(Kind::BoolValue(b)) => serde_json::Value::Bool(b),
            _ => continue,
        };
        map.insert(key, json);
    }
    serde_json::Value::Object(map)
}

#[async_trait]
impl VectorBackend for QdrantVectorBackend {
    async fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        filter: &VectorFilter,
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<VectorHit>> {
        let mut builder = SearchPointsBuilder::new(collection, vector, limit as u64)
            .score_threshold(score_threshold)
            .with_payload(true);
        if !filter.is_empty() {
            builder = builder.filter(into_qdrant(filter));
        }
        if let Some(hnsw_ef) = self.hnsw_ef {
            builder = builder.params(SearchParams {
                hnsw_ef: Some(hnsw_ef),
                ..Default::default()
            });
        }

        let response = self.client.search_points(builder).await?;

        Ok(response
            .result
            .into_iter()
            .map(|point| {
                let id = point
                    .id
                    .and_then(|pid| pid.point_id_options)
                    .map(|options| match options {
                        PointIdOptions::Uuid(u) => u,
                        PointIdOptions::Num(n) => n.to_string(),
                    })
                    .unwrap_or_default();
                VectorHit {
                    id,
                    score: f64::from(point.score),
                    payload: payload_to_json(point.payload),
                }
            })
            .collect())
    }
}
