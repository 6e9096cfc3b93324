//! Analysis result document and its normalisation.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
use crate::request::JobStatus;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Predictions {
    pub binary_cancer_prediction: bool,
    pub binary_cancer_probability: f64,
    pub predicted_cancer_type: Option<String>,
    /// Sorted by cancer type name.
    pub per_type_probabilities: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Biomarker {
    pub name: String,
    pub value: f64,
}

/// Final, immutable output of a completed analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub request_id: String,
    pub status: JobStatus,
    pub predictions: Predictions,
    pub biomarkers: Vec<Biomarker>,
}

impl AnalysisResult {
    /// Normalise a raw result document fetched for `request_id`.
    pub fn from_document(
        request_id: &str,
        document: serde_json::Value,
    ) -> Result<Self, AnalysisError> {
        let payload: ResultPayload =
            serde_json::from_value(document).map_err(AnalysisError::malformed)?;
        payload.normalize(request_id)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultPayload {
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    predictions: PredictionsPayload,
    #[serde(default)]
    biomarkers: Option<BiomarkersPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PredictionsPayload {
    binary_cancer_prediction: BinaryLabel,
    binary_cancer_probability: f64,
    #[serde(default)]
    predicted_cancer_type: Option<String>,
    #[serde(default)]
    per_type_probabilities: HashMap<String, f64>,
}

/// Backends disagree on how the binary call is spelled.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BinaryLabel {
    Flag(bool),
    Number(i64),
    Text(String),
}

impl BinaryLabel {
    fn to_bool(&self) -> Option<bool> {
        match self {
            Self::Flag(b) => Some(*b),
            Self::Number(1) => Some(true),
            Self::Number(0) => Some(false),
            Self::Number(_) => None,
            Self::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "cancer" | "tumor" | "tumour" | "positive" => Some(true),
                "false" | "0" | "normal" | "healthy" | "negative" => Some(false),
                _ => None,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BiomarkersPayload {
    List(Vec<Biomarker>),
    Map(HashMap<String, f64>),
}

fn check_probability(field: &str, value: f64) -> Result<f64, AnalysisError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(AnalysisError::malformed(format!(
            "{} must be a probability in [0, 1], got {}",
            field, value
        )))
    }
}

impl ResultPayload {
    fn normalize(self, request_id: &str) -> Result<AnalysisResult, AnalysisError> {
        if let Some(ref id) = self.request_id
            && id != request_id
        {
            return Err(AnalysisError::malformed(format!(
                "result belongs to request '{}', expected '{}'",
                id, request_id
            )));
        }

        let status = match self.status {
            None => JobStatus::Completed,
            Some(ref raw) => JobStatus::from_wire(raw).ok_or_else(|| {
                AnalysisError::malformed(format!("unrecognised result status '{}'", raw))
            })?,
        };

        let p = self.predictions;
        let binary_cancer_prediction = p.binary_cancer_prediction.to_bool().ok_or_else(|| {
            AnalysisError::malformed(format!(
                "unrecognised binary prediction {:?}",
                p.binary_cancer_prediction
            ))
        })?;
        let binary_cancer_probability =
            check_probability("binaryCancerProbability", p.binary_cancer_probability)?;

        let mut per_type_probabilities = BTreeMap::new();
        for (cancer_type, probability) in p.per_type_probabilities {
            let probability = check_probability(&cancer_type, probability)?;
            per_type_probabilities.insert(cancer_type, probability);
        }

        let predicted_cancer_type = p
            .predicted_cancer_type
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        let biomarkers = match self.biomarkers {
            None => Vec::new(),
            Some(BiomarkersPayload::List(list)) => list,
            Some(BiomarkersPayload::Map(map)) => {
                let mut list: Vec<Biomarker> = map
                    .into_iter()
                    .map(|(name, value)| Biomarker { name, value })
                    .collect();
                list.sort_by(|a, b| b.value.total_cmp(&a.value).then_with(|| a.name.cmp(&b.name)));
                list
            }
        };
        if let Some(bad) = biomarkers.iter().find(|b| !b.value.is_finite()) {
            return Err(AnalysisError::malformed(format!(
                "biomarker '{}' has a non-finite value",
                bad.name
            )));
        }

        Ok(AnalysisResult {
            request_id: request_id.to_string(),
            status,
            predictions: Predictions {
                binary_cancer_prediction,
                binary_cancer_probability,
                predicted_cancer_type,
                per_type_probabilities,
            },
            biomarkers,
        })
    }
}
