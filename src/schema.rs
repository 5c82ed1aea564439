//! National ID extraction schema types.
//!
//! Response shapes match what the web client expects from the
//! `/api/doc-ai/process-*` endpoints.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Entity type name → extracted text. Later entities overwrite earlier ones.
pub type EntityMap = HashMap<String, String>;

/// Upload types the processors accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentMime {
    Jpeg,
    Png,
    Pdf,
}

impl DocumentMime {
    pub fn parse(content_type: &str) -> Option<Self> {
        match content_type {
            "image/jpeg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "application/pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Pdf => "application/pdf",
        }
    }
}

/// An uploaded document, alive for one request.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub content: Vec<u8>,
    pub mime: DocumentMime,
}

impl RawDocument {
    pub fn new(content: Vec<u8>, mime: DocumentMime) -> Self {
        Self { content, mime }
    }
}

/// Which remote processor a call goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorRole {
    Front,
    Rear,
}

impl ProcessorRole {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Front => "front",
            Self::Rear => "rear",
        }
    }
}

impl std::fmt::Display for ProcessorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of one remote processor call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub text: String,
    pub entities: EntityMap,
}

/// Front side of the PH National ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontNationalIdData {
    pub unique_id_number: Option<String>,
    pub last_name: Option<String>,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub birth_date: Option<String>,
    pub complete_address: Option<String>,
}

impl FrontNationalIdData {
    /// Exact-key lookup per field; a missing key leaves the field empty.
    pub fn from_entities(entities: &EntityMap) -> Self {
        let get = |key: &str| entities.get(key).cloned();
        Self {
            unique_id_number: get("unique_id_number"),
            last_name: get("last_name"),
            first_name: get("first_name"),
            middle_name: get("middle_name"),
            birth_date: get("birth_date"),
            complete_address: get("complete_address"),
        }
    }
}

/// Rear side of the PH National ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RearNationalIdData {
    pub issued_date: Option<String>,
    pub sex: Option<String>,
    pub blood_type: Option<String>,
    pub marital_status: Option<String>,
    pub place_of_birth: Option<String>,
}

impl RearNationalIdData {
    pub fn from_entities(entities: &EntityMap) -> Self {
        let get = |key: &str| entities.get(key).cloned();
        Self {
            issued_date: get("issued_date"),
            sex: get("sex"),
            blood_type: get("blood_type"),
            marital_status: get("marital_status"),
            place_of_birth: get("place_of_birth"),
        }
    }
}

/// Which side(s) a dual-processor run detected.
///
/// `Nothing` goes over the wire as `"front"` so existing clients keep
/// working; the response message is what tells the two apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorOutcome {
    Front,
    Rear,
    Both,
    Nothing,
}

impl ProcessorOutcome {
    pub fn classify(front: Option<&FrontNationalIdData>, rear: Option<&RearNationalIdData>) -> Self {
        let has_front = front.is_some_and(|f| f.unique_id_number.is_some());
        let has_rear = rear.is_some_and(|r| r.issued_date.is_some());

        match (has_front, has_rear) {
            (true, true) => Self::Both,
            (true, false) => Self::Front,
            (false, true) => Self::Rear,
            (false, false) => Self::Nothing,
        }
    }

    pub fn processor_type(&self) -> ProcessorType {
        match self {
            Self::Front | Self::Nothing => ProcessorType::Front,
            Self::Rear => ProcessorType::Rear,
            Self::Both => ProcessorType::Both,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::Both => "Both front and rear ID data extracted successfully",
            Self::Front => "Front ID data extracted successfully",
            Self::Rear => "Rear ID data extracted successfully",
            Self::Nothing => "Document processed but no ID data found",
        }
    }
}

/// Wire value of `processor_used`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorType {
    Front,
    Rear,
    Both,
}

/// Body of every successful `/process-*` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NationalIdResponse {
    pub success: bool,
    pub message: String,
    pub processor_used: ProcessorType,
    pub front_data: Option<FrontNationalIdData>,
    pub rear_data: Option<RearNationalIdData>,
    pub raw_text: String,
}

impl NationalIdResponse {
    pub fn front(data: FrontNationalIdData, raw_text: String) -> Self {
        Self {
            success: true,
            message: "Front ID processed successfully".to_string(),
            processor_used: ProcessorType::Front,
            front_data: Some(data),
            rear_data: None,
            raw_text,
        }
    }

    pub fn rear(data: RearNationalIdData, raw_text: String) -> Self {
        Self {
            success: true,
            message: "Rear ID processed successfully".to_string(),
            processor_used: ProcessorType::Rear,
            front_data: None,
            rear_data: Some(data),
            raw_text,
        }
    }
}
