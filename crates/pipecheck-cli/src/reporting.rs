use pipecheck_core::report::{CollectingReporter, Report, Reporter, Severity};

/// Logs every issue as it happens and keeps it for the final summary.
#[derive(Default)]
pub struct PrintReporter {
    inner: CollectingReporter,
}

impl PrintReporter {
    pub fn new() -> PrintReporter {
        PrintReporter::default()
    }

    pub fn reports(&self) -> Vec<Report> {
        self.inner.reports()
    }

    pub fn worst_severity(&self) -> Option<Severity> {
        self.inner.worst_severity()
    }
}

impl Reporter for PrintReporter {
    fn report(&self, report: Report) {
        match report.severity {
            Severity::Critical => {
                tracing::error!(issue = %report.issue, "{}", report.message)
            }
            Severity::Warning => {
                tracing::warn!(issue = %report.issue, "{}", report.message)
            }
            Severity::Issue => {
                tracing::info!(issue = %report.issue, "{}", report.message)
            }
        }
        self.inner.report(report);
    }
}
