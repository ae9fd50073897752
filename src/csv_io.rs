use crate::error::ClassifyError;
use crate::orchestrator::{ClassificationResult, LogEntry};

/// Parse an uploaded CSV into log entries.
///
/// Requires `source` and `log_message` columns; an optional `id` column is
/// carried through to the results. Column validation is a load-time check so
/// a bad upload fails before any classification work starts.
pub fn parse_entries(data: &[u8]) -> Result<Vec<LogEntry>, ClassifyError> {
    let mut reader = csv::Reader::from_reader(data);

    let headers = reader.headers()?.clone();
    let source_idx = headers
        .iter()
        .position(|h| h == "source")
        .ok_or(ClassifyError::MissingColumn("source"))?;
    let message_idx = headers
        .iter()
        .position(|h| h == "log_message")
        .ok_or(ClassifyError::MissingColumn("log_message"))?;
    let id_idx = headers.iter().position(|h| h == "id");

    let mut entries = Vec::new();
    for record in reader.records() {
        let record = record?;
        entries.push(LogEntry {
            id: id_idx
                .and_then(|i| record.get(i))
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string()),
            source: record
                .get(source_idx)
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string()),
            log_message: record.get(message_idx).unwrap_or_default().to_string(),
        });
    }
    Ok(entries)
}

/// Render results back to CSV for download.
pub fn write_results(results: &[ClassificationResult]) -> Result<String, ClassifyError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["source", "log_message", "target_label", "stage"])?;
    for result in results {
        let stage = serde_json::to_value(result.stage)
            .ok()
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .unwrap_or_default();
        writer.write_record([
            result.source.as_deref().unwrap_or(""),
            result.log_message.as_str(),
            result.target_label.as_str(),
            stage.as_str(),
        ])?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| ClassifyError::Config(format!("CSV write failed: {e}")))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::ClassificationStage;

    #[test]
    fn test_parse_entries() {
        let csv = "source,log_message\nWebServer,User User123 logged in.\nLegacyCRM,Case escalation failed\n";
        let entries = parse_entries(csv.as_bytes()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].source.as_deref(), Some("WebServer"));
        assert_eq!(entries[0].log_message, "User User123 logged in.");
        assert_eq!(entries[1].source.as_deref(), Some("LegacyCRM"));
    }

    #[test]
    fn test_parse_entries_with_id_column() {
        let csv = "id,source,log_message\n42,WebServer,hello\n,Database,world\n";
        let entries = parse_entries(csv.as_bytes()).unwrap();
        assert_eq!(entries[0].id.as_deref(), Some("42"));
        assert_eq!(entries[1].id, None);
    }

    #[test]
    fn test_missing_column_rejected() {
        let csv = "source,message\nWebServer,hello\n";
        let err = parse_entries(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, ClassifyError::MissingColumn("log_message")));
    }

    #[test]
    fn test_write_results_roundtrip_shape() {
        let results = vec![ClassificationResult {
            id: None,
            source: Some("WebServer".to_string()),
            log_message: "User User123 logged in.".to_string(),
            target_label: "User Action".to_string(),
            stage: ClassificationStage::Pattern,
            confidence: None,
            processing_time_ms: 0.2,
        }];
        let csv = write_results(&results).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("source,log_message,target_label,stage"));
        assert_eq!(
            lines.next(),
            Some("WebServer,User User123 logged in.,User Action,pattern")
        );
    }
}
