// src/report/mod.rs

//! Execution reports and the mail seam.
//!
//! The core never talks to a mail server; it composes a subject and body and
//! hands them to a [`Sender`]. The default sender just logs, which keeps the
//! runner usable without any mail configuration.

use std::path::PathBuf;

use anyhow::Result;
use tracing::info;

use crate::dag::{Dag, MailConfig};
use crate::history::{Node, RunStatus, Status};

/// Outbound mail transport.
pub trait Sender: Send + Sync {
    fn send(
        &self,
        from: &str,
        to: &[String],
        subject: &str,
        body: &str,
        attachments: &[PathBuf],
    ) -> Result<()>;
}

/// Sender that records the mail in the log instead of delivering it.
pub struct LogSender;

impl Sender for LogSender {
    fn send(
        &self,
        from: &str,
        to: &[String],
        subject: &str,
        _body: &str,
        _attachments: &[PathBuf],
    ) -> Result<()> {
        info!(from = %from, to = ?to, subject = %subject, "mail suppressed (no sender configured)");
        Ok(())
    }
}

/// Decides whether a finished execution warrants mail and composes it.
pub struct Reporter {
    sender: Box<dyn Sender>,
}

impl Reporter {
    pub fn new(sender: Box<dyn Sender>) -> Self {
        Self { sender }
    }

    /// Called once per finished execution. Sends at most one mail:
    /// an error report when the workflow failed with an error and
    /// `mailOn.failure` is set, or a success report when it finished and
    /// `mailOn.success` is set.
    pub fn report(&self, dag: &Dag, status: &Status, error: Option<&str>) -> Result<()> {
        let Some(mail_on) = &dag.mail_on else {
            return Ok(());
        };

        match status.status {
            RunStatus::Error if mail_on.failure && error.is_some() => {
                let mail = dag.error_mail.clone().unwrap_or_default();
                self.send_report(&mail, dag, status, error)
            }
            RunStatus::Success if mail_on.success => {
                let mail = dag.info_mail.clone().unwrap_or_default();
                self.send_report(&mail, dag, status, None)
            }
            _ => Ok(()),
        }
    }

    fn send_report(
        &self,
        mail: &MailConfig,
        dag: &Dag,
        status: &Status,
        error: Option<&str>,
    ) -> Result<()> {
        let subject = format!("{}{} {}", mail.prefix, dag.name, status.status_text);
        let body = format!(
            "{}\n\n{}",
            render_summary(status, error),
            render_table(&status.nodes)
        );
        self.sender.send(&mail.from, &mail.to, &subject, &body, &[])
    }
}

/// One-line summary of the execution.
pub fn render_summary(status: &Status, error: Option<&str>) -> String {
    let mut out = format!(
        "{}: {} (started {}, finished {})",
        status.name, status.status_text, status.started_at, status.finished_at
    );
    if let Some(err) = error {
        out.push_str(&format!("\nerror: {err}"));
    }
    out
}

/// Plain-text step table.
pub fn render_table(nodes: &[Node]) -> String {
    let mut out = String::from("step\tstatus\tstarted\tfinished\terror\n");
    for node in nodes {
        out.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\n",
            node.step.name, node.status_text, node.started_at, node.finished_at, node.error
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::MailOn;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct SentMail {
        count: usize,
        subject: String,
        to: Vec<String>,
    }

    struct MockSender(Arc<Mutex<SentMail>>);

    impl Sender for MockSender {
        fn send(
            &self,
            _from: &str,
            to: &[String],
            subject: &str,
            _body: &str,
            _attachments: &[PathBuf],
        ) -> Result<()> {
            let mut sent = self.0.lock().unwrap();
            sent.count += 1;
            sent.subject = subject.to_string();
            sent.to = to.to_vec();
            Ok(())
        }
    }

    fn test_dag(mail_on: MailOn) -> Dag {
        Dag {
            id: "wf".to_string(),
            name: "test workflow".to_string(),
            mail_on: Some(mail_on),
            error_mail: Some(MailConfig {
                from: "from@mailer.test".to_string(),
                to: vec!["ops@mailer.test".to_string()],
                prefix: "Error: ".to_string(),
            }),
            info_mail: Some(MailConfig {
                from: "from@mailer.test".to_string(),
                to: vec!["ops@mailer.test".to_string()],
                prefix: "Success: ".to_string(),
            }),
            ..Dag::default()
        }
    }

    fn status_with(status: RunStatus) -> Status {
        let mut s = Status {
            name: "test workflow".to_string(),
            request_id: "r".to_string(),
            ..Status::default()
        };
        s.set_status(status);
        s
    }

    fn reporter() -> (Reporter, Arc<Mutex<SentMail>>) {
        let sent = Arc::new(Mutex::new(SentMail::default()));
        (Reporter::new(Box::new(MockSender(Arc::clone(&sent)))), sent)
    }

    #[test]
    fn error_with_failure_flag_sends_error_mail() {
        let (reporter, sent) = reporter();
        let dag = test_dag(MailOn {
            success: false,
            failure: true,
        });

        reporter
            .report(&dag, &status_with(RunStatus::Error), Some("boom"))
            .unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.count, 1);
        assert!(sent.subject.starts_with("Error: "));
        assert!(sent.subject.contains("test workflow"));
    }

    #[test]
    fn error_without_error_value_sends_nothing() {
        let (reporter, sent) = reporter();
        let dag = test_dag(MailOn {
            success: true,
            failure: true,
        });

        reporter
            .report(&dag, &status_with(RunStatus::Error), None)
            .unwrap();

        assert_eq!(sent.lock().unwrap().count, 0);
    }

    #[test]
    fn success_with_success_flag_sends_info_mail() {
        let (reporter, sent) = reporter();
        let dag = test_dag(MailOn {
            success: true,
            failure: true,
        });

        reporter
            .report(&dag, &status_with(RunStatus::Success), None)
            .unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.count, 1);
        assert!(sent.subject.starts_with("Success: "));
    }

    #[test]
    fn no_mail_on_sends_nothing() {
        let (reporter, sent) = reporter();
        let mut dag = test_dag(MailOn::default());
        dag.mail_on = None;

        reporter
            .report(&dag, &status_with(RunStatus::Success), None)
            .unwrap();

        assert_eq!(sent.lock().unwrap().count, 0);
    }

    #[test]
    fn summary_and_table_include_the_essentials() {
        let mut status = status_with(RunStatus::Error);
        let mut node = Node::from_step(crate::dag::Step {
            name: "extract".to_string(),
            command: "true".to_string(),
            ..crate::dag::Step::default()
        });
        node.set_status(RunStatus::Error);
        node.error = "exit 1".to_string();
        status.nodes.push(node);

        let summary = render_summary(&status, Some("exit 1"));
        assert!(summary.contains("test workflow"));
        assert!(summary.contains("exit 1"));

        let table = render_table(&status.nodes);
        assert!(table.contains("extract"));
        assert!(table.contains("exit 1"));
    }
}
