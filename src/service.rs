//! National ID processing on top of an [`ExtractionClient`].
//!
//! Single-side operations propagate remote failures. The dual-side operation
//! runs both processors concurrently, isolates failures per side and
//! classifies which side(s) the upload actually contained.

use std::sync::Arc;

use tracing::{info, warn};

use crate::docai::{ExtractionClient, RemoteServiceError};
use crate::schema::{
    FrontNationalIdData, ProcessorOutcome, ProcessorRole, RawDocument, RearNationalIdData,
};

/// Output of [`IdService::process_both_sides`].
#[derive(Debug, Clone, PartialEq)]
pub struct DualSideResult {
    pub front: Option<FrontNationalIdData>,
    pub rear: Option<RearNationalIdData>,
    pub outcome: ProcessorOutcome,
    /// `FRONT:` / `REAR:` segments of the sides that answered, front first.
    pub raw_text: String,
}

#[derive(Clone)]
pub struct IdService {
    client: Arc<dyn ExtractionClient>,
}

impl IdService {
    pub fn new(client: Arc<dyn ExtractionClient>) -> Self {
        Self { client }
    }

    pub fn processor_name(&self, role: ProcessorRole) -> &str {
        self.client.processor_name(role)
    }

    pub async fn resolve_processor(&self, role: ProcessorRole) -> Result<String, RemoteServiceError> {
        self.client.resolve_processor(role).await
    }

    pub async fn process_front(
        &self,
        document: &RawDocument,
    ) -> Result<(FrontNationalIdData, String), RemoteServiceError> {
        let extraction = self.client.extract(document, ProcessorRole::Front).await?;
        Ok((
            FrontNationalIdData::from_entities(&extraction.entities),
            extraction.text,
        ))
    }

    pub async fn process_rear(
        &self,
        document: &RawDocument,
    ) -> Result<(RearNationalIdData, String), RemoteServiceError> {
        let extraction = self.client.extract(document, ProcessorRole::Rear).await?;
        Ok((
            RearNationalIdData::from_entities(&extraction.entities),
            extraction.text,
        ))
    }

    /// Run both processors and work out which side(s) are present.
    ///
    /// Never fails: a side whose call errors contributes no data and no text.
    /// Both calls are awaited before classifying, even when one fails early.
    pub async fn process_both_sides(&self, document: &RawDocument) -> DualSideResult {
        let (front, rear) = tokio::join!(self.process_front(document), self.process_rear(document));

        let mut segments = Vec::with_capacity(2);

        let front = match front {
            Ok((data, text)) => {
                segments.push(format!("FRONT:\n{}", text));
                Some(data)
            }
            Err(e) => {
                warn!("Front processor failed: {}", e);
                None
            }
        };

        let rear = match rear {
            Ok((data, text)) => {
                segments.push(format!("REAR:\n{}", text));
                Some(data)
            }
            Err(e) => {
                warn!("Rear processor failed: {}", e);
                None
            }
        };

        let outcome = ProcessorOutcome::classify(front.as_ref(), rear.as_ref());
        info!(
            "Dual-side detection: {:?} (front {}, rear {})",
            outcome,
            if front.is_some() { "ok" } else { "failed" },
            if rear.is_some() { "ok" } else { "failed" },
        );

        DualSideResult {
            front,
            rear,
            outcome,
            raw_text: segments.join("\n\n"),
        }
    }
}
