//! Extension-based document dispatch.
//!
//! A document's declared extension selects exactly one processing lane:
//!
//! | Lane | Extensions | Capability |
//! |---|---|---|
//! | `text_document` | txt, docx, pdf, doc | embedding generation |
//! | `spreadsheet` | csv, xls, xlsx | spreadsheet handling |
//! | `audio` | wav, mp3 | audio analysis |
//!
//! Matching is exact and case-sensitive. Any other extension fails the
//! dispatch with [`ServiceError::InvalidExtension`].

use std::collections::HashMap;
use std::sync::LazyLock;

use strum::{Display, EnumIter, IntoEnumIterator, IntoStaticStr};
use tracing::{info, warn};

use crate::error::{CapabilityError, ServiceError, ServiceResult};
use crate::tasks::AppContext;

/// Folder prefix for audio analysis artifacts
pub const ANALYSIS_RESULTS_DIR: &str = "analysis_results";

/// Mutually exclusive processing paths for a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ProcessingLane {
    TextDocument,
    Spreadsheet,
    Audio,
}

static LANE_BY_EXTENSION: LazyLock<HashMap<&'static str, ProcessingLane>> = LazyLock::new(|| {
    ProcessingLane::iter()
        .flat_map(|lane| lane.extensions().iter().map(move |ext| (*ext, lane)))
        .collect()
});

impl ProcessingLane {
    /// Extensions routed to this lane
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            ProcessingLane::TextDocument => &["txt", "docx", "pdf", "doc"],
            ProcessingLane::Spreadsheet => &["csv", "xls", "xlsx"],
            ProcessingLane::Audio => &["wav", "mp3"],
        }
    }

    /// Look up the lane for an extension token. `None` means unclassified.
    pub fn classify(file_extension: &str) -> Option<Self> {
        LANE_BY_EXTENSION.get(file_extension).copied()
    }
}

/// Part of a document name before its first `.`
pub fn name_stem(document_name: &str) -> &str {
    document_name
        .split('.')
        .next()
        .unwrap_or(document_name)
}

/// Where the audio analyzer writes its transcript for a document
pub fn analysis_output_path(document_name: &str) -> String {
    format!("{}/{}.txt", ANALYSIS_RESULTS_DIR, name_stem(document_name))
}

/// Route one document to the capability for its extension.
///
/// Steps run strictly in order: lookup, file materialization,
/// classification, one capability call. The materialized file is released
/// when this function returns, on success and on every error. Errors from
/// the lookup or a capability are returned unchanged.
pub async fn dispatch_document(
    ctx: &AppContext,
    document_id: &str,
    file_extension: &str,
) -> ServiceResult<()> {
    let caps = &ctx.capabilities;

    let document = caps.documents.find_document(document_id).await?;
    let file = caps.files.materialize(&document.id).await?;

    let lane = match ProcessingLane::classify(file_extension) {
        Some(lane) => lane,
        None => {
            warn!(doc_id = %document.id, extension = %file_extension, "Unrecognized file extension");
            return Err(ServiceError::InvalidExtension {
                extension: file_extension.to_string(),
            });
        }
    };

    info!(
        doc_id = %document.id,
        name = %document.name,
        extension = %file_extension,
        lane = %lane,
        "Dispatching document"
    );

    match lane {
        ProcessingLane::TextDocument => {
            caps.embeddings
                .create_embeddings(&document.id, file.path(), file_extension)
                .await?;
        }
        ProcessingLane::Spreadsheet => {
            caps.spreadsheets
                .handle_spreadsheet(&document.name, &document.user_id, file.path(), file_extension)
                .await?;
        }
        ProcessingLane::Audio => {
            let output_path = analysis_output_path(&document.name);
            let urls = caps.download_urls.create_download_urls(&document.id).await?;
            let download_url = urls.first().ok_or_else(|| CapabilityError::NoDownloadUrl {
                document_id: document.id.clone(),
            })?;
            caps.audio
                .analyze_audio(download_url, &output_path, &document.id)
                .await?;
        }
    }

    let lane_label: &'static str = lane.into();
    metrics::counter!("docdispatch_dispatch_total", "lane" => lane_label).increment(1);

    info!(doc_id = %document.id, lane = %lane, "Document dispatched");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, MockCapabilities};

    fn assert_released(mocks: &MockCapabilities) {
        let paths = mocks.materialized_paths();
        assert_eq!(paths.len(), 1, "expected exactly one materialization");
        assert!(!paths[0].exists(), "temporary file was not released");
    }

    #[test]
    fn test_lane_tables_are_disjoint() {
        let total: usize = ProcessingLane::iter().map(|l| l.extensions().len()).sum();
        assert_eq!(LANE_BY_EXTENSION.len(), total);
    }

    #[test]
    fn test_classify_is_exact_and_case_sensitive() {
        assert_eq!(ProcessingLane::classify("pdf"), Some(ProcessingLane::TextDocument));
        assert_eq!(ProcessingLane::classify("xlsx"), Some(ProcessingLane::Spreadsheet));
        assert_eq!(ProcessingLane::classify("wav"), Some(ProcessingLane::Audio));
        assert_eq!(ProcessingLane::classify("PDF"), None);
        assert_eq!(ProcessingLane::classify(".pdf"), None);
        assert_eq!(ProcessingLane::classify("pdf "), None);
        assert_eq!(ProcessingLane::classify(""), None);
        assert_eq!(ProcessingLane::classify("zip"), None);
    }

    #[test]
    fn test_name_stem_takes_first_segment() {
        assert_eq!(name_stem("call.mp3"), "call");
        assert_eq!(name_stem("weekly.sync.2024.wav"), "weekly");
        assert_eq!(name_stem("noextension"), "noextension");
        assert_eq!(name_stem(".hidden.mp3"), "");
        assert_eq!(analysis_output_path("call.mp3"), "analysis_results/call.txt");
    }

    #[test]
    fn test_lane_labels() {
        assert_eq!(ProcessingLane::TextDocument.to_string(), "text_document");
        let label: &'static str = ProcessingLane::Audio.into();
        assert_eq!(label, "audio");
    }

    #[tokio::test]
    async fn test_text_extensions_invoke_only_embeddings() {
        for ext in ["txt", "docx", "pdf", "doc"] {
            let mocks = MockCapabilities::new().with_document("doc-1", &format!("notes.{ext}"), "u1");
            let ctx = mocks.context();

            dispatch_document(&ctx, "doc-1", ext).await.unwrap();

            let calls = mocks.processing_calls();
            let tmp = mocks.materialized_paths()[0].clone();
            assert_eq!(
                calls,
                vec![Call::Embeddings {
                    document_id: "doc-1".to_string(),
                    file_path: tmp,
                    file_extension: ext.to_string(),
                }],
                "extension {ext}"
            );
            assert_released(&mocks);
        }
    }

    #[tokio::test]
    async fn test_spreadsheet_extensions_invoke_only_spreadsheet_handler() {
        for ext in ["csv", "xls", "xlsx"] {
            let mocks = MockCapabilities::new().with_document("D", &format!("report.{ext}"), "U");
            let ctx = mocks.context();

            dispatch_document(&ctx, "D", ext).await.unwrap();

            let tmp = mocks.materialized_paths()[0].clone();
            assert_eq!(
                mocks.processing_calls(),
                vec![Call::Spreadsheet {
                    document_name: format!("report.{ext}"),
                    user_id: "U".to_string(),
                    file_path: tmp,
                    file_extension: ext.to_string(),
                }],
                "extension {ext}"
            );
            assert_released(&mocks);
        }
    }

    #[tokio::test]
    async fn test_audio_uses_first_download_url_and_results_path() {
        let mocks = MockCapabilities::new()
            .with_document("D", "call.mp3", "U")
            .with_download_urls(&["http://files.test/D?sig=1", "http://mirror.test/D"]);
        let ctx = mocks.context();

        dispatch_document(&ctx, "D", "mp3").await.unwrap();

        assert_eq!(
            mocks.calls(),
            vec![
                Call::FindDocument("D".to_string()),
                Call::Materialize("D".to_string()),
                Call::DownloadUrls("D".to_string()),
                Call::Audio {
                    download_url: "http://files.test/D?sig=1".to_string(),
                    output_path: "analysis_results/call.txt".to_string(),
                    document_id: "D".to_string(),
                },
            ]
        );
        assert_released(&mocks);
    }

    #[tokio::test]
    async fn test_wav_is_audio() {
        let mocks = MockCapabilities::new().with_document("D", "standup.wav", "U");
        let ctx = mocks.context();

        dispatch_document(&ctx, "D", "wav").await.unwrap();

        assert!(matches!(
            mocks.processing_calls().as_slice(),
            [Call::Audio { output_path, .. }] if output_path == "analysis_results/standup.txt"
        ));
    }

    #[tokio::test]
    async fn test_empty_download_url_list_fails() {
        let mocks = MockCapabilities::new()
            .with_document("D", "call.mp3", "U")
            .with_download_urls(&[]);
        let ctx = mocks.context();

        let result = dispatch_document(&ctx, "D", "mp3").await;

        assert!(matches!(
            result,
            Err(ServiceError::Capability(CapabilityError::NoDownloadUrl { .. }))
        ));
        assert!(mocks.processing_calls().is_empty());
        assert_released(&mocks);
    }

    #[tokio::test]
    async fn test_unrecognized_extensions_fail_and_release_file() {
        for ext in ["zip", "", "PDF", "Mp3"] {
            let mocks = MockCapabilities::new().with_document("D", "upload.bin", "U");
            let ctx = mocks.context();

            let result = dispatch_document(&ctx, "D", ext).await;

            assert!(
                matches!(&result, Err(ServiceError::InvalidExtension { extension }) if extension == ext),
                "extension {ext:?} gave {result:?}"
            );
            assert!(mocks.processing_calls().is_empty());
            assert!(!mocks.calls().contains(&Call::DownloadUrls("D".to_string())));
            assert_released(&mocks);
        }
    }

    #[tokio::test]
    async fn test_lookup_failure_stops_before_file_acquisition() {
        let mocks = MockCapabilities::new();
        let ctx = mocks.context();

        let result = dispatch_document(&ctx, "ghost", "pdf").await;

        assert!(matches!(
            result,
            Err(ServiceError::DocumentNotFound { document_id }) if document_id == "ghost"
        ));
        assert_eq!(mocks.calls(), vec![Call::FindDocument("ghost".to_string())]);
        assert!(mocks.materialized_paths().is_empty());
    }

    #[tokio::test]
    async fn test_downstream_error_propagates_and_releases_file() {
        let mocks = MockCapabilities::new()
            .with_document("D", "report.csv", "U")
            .with_failing_downstream();
        let ctx = mocks.context();

        let result = dispatch_document(&ctx, "D", "csv").await;

        assert!(matches!(
            result,
            Err(ServiceError::Capability(CapabilityError::Rejected {
                capability: "spreadsheet handling",
                status: 500,
                ..
            }))
        ));
        assert_eq!(mocks.processing_calls().len(), 1);
        assert_released(&mocks);
    }

    #[tokio::test]
    async fn test_declared_extension_wins_over_document_name() {
        // Routing looks only at the extension argument
        let mocks = MockCapabilities::new().with_document("D", "clip.mp3", "U");
        let ctx = mocks.context();

        dispatch_document(&ctx, "D", "txt").await.unwrap();

        assert!(matches!(
            mocks.processing_calls().as_slice(),
            [Call::Embeddings { .. }]
        ));
    }
}
