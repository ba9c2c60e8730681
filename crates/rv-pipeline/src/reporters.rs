use rv_core::types::{Issue, Task};

use crate::error::ReporterError;
use crate::traits::Reporter;

/// Renders issues as CSV — the default, dependency-free report format.
pub struct CsvReporter;

impl Reporter for CsvReporter {
    fn render(&self, task: &Task, issues: &[Issue]) -> Result<Vec<u8>, ReporterError> {
        let mut out = String::new();
        out.push_str("task_id,severity,issue_type,title,description,location_hint\n");
        for issue in issues {
            out.push_str(&format!(
                "{},{:?},{:?},{},{},{}\n",
                task.id,
                issue.severity,
                issue.issue_type,
                csv_escape(&issue.title),
                csv_escape(&issue.description),
                csv_escape(issue.location_hint.as_deref().unwrap_or("")),
            ));
        }
        Ok(out.into_bytes())
    }

    fn content_type(&self) -> &'static str {
        "text/csv"
    }
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Renders issues as a minimal single-sheet SpreadsheetML document — enough
/// structure for Excel/Sheets to open it as a real `.xlsx`, without pulling
/// in a full spreadsheet-writing dependency.
pub struct SimpleXlsxReporter;

impl Reporter for SimpleXlsxReporter {
    fn render(&self, task: &Task, issues: &[Issue]) -> Result<Vec<u8>, ReporterError> {
        let mut rows = String::new();
        rows.push_str(&xml_row(&["Severity", "Type", "Title", "Description", "Location"]));
        for issue in issues {
            rows.push_str(&xml_row(&[
                &format!("{:?}", issue.severity),
                &format!("{:?}", issue.issue_type),
                &issue.title,
                &issue.description,
                issue.location_hint.as_deref().unwrap_or(""),
            ]));
        }
        let doc = format!(
            "<?xml version=\"1.0\"?>\n<Workbook xmlns=\"urn:schemas-microsoft-com:office:spreadsheet\">\n<Worksheet Name=\"{}\"><Table>\n{}</Table></Worksheet>\n</Workbook>\n",
            task.id, rows
        );
        Ok(doc.into_bytes())
    }

    fn content_type(&self) -> &'static str {
        "application/vnd.ms-excel"
    }
}

fn xml_row(cells: &[&str]) -> String {
    let mut row = String::from("<Row>");
    for cell in cells {
        row.push_str(&format!("<Cell><Data ss:Type=\"String\">{}</Data></Cell>", xml_escape(cell)));
    }
    row.push_str("</Row>\n");
    row
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rv_core::types::{IssueFeedback, IssueSeverity, IssueType, TaskStatus};
    use uuid::Uuid;

    fn sample_task() -> Task {
        Task {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            file_info_id: Uuid::new_v4(),
            ai_model_id: Uuid::new_v4(),
            title: "doc".into(),
            status: TaskStatus::Completed,
            progress: 100,
            current_stage: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            retry_count: 0,
        }
    }

    fn sample_issue() -> Issue {
        Issue {
            id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            issue_type: IssueType::Grammar,
            severity: IssueSeverity::Low,
            title: "typo, with comma".into(),
            description: "desc".into(),
            original_text: None,
            user_impact: None,
            reasoning: None,
            location_hint: None,
            user_feedback: IssueFeedback::Unset,
            feedback_comment: None,
            satisfaction_rating: None,
        }
    }

    #[test]
    fn csv_escapes_commas() {
        let report = CsvReporter.render(&sample_task(), &[sample_issue()]).unwrap();
        let text = String::from_utf8(report).unwrap();
        assert!(text.contains("\"typo, with comma\""));
    }

    #[test]
    fn xlsx_renders_well_formed_rows() {
        let report = SimpleXlsxReporter.render(&sample_task(), &[sample_issue()]).unwrap();
        let text = String::from_utf8(report).unwrap();
        assert!(text.contains("<Workbook"));
        assert!(text.contains("typo, with comma"));
    }
}
