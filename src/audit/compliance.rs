//! Compliance report generation from audit trail data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

use crate::audit::entry::{AuditEntry, VerificationStatus};
use crate::audit::manager::{AuditTrailManager, IntegrityReport};
use crate::error::Result;

/// Comprehensive compliance report for a time period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub report_id: String,
    pub generated_at: DateTime<Utc>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_decisions: usize,
    pub by_type: HashMap<String, usize>,
    pub by_agent: HashMap<String, usize>,
    pub verification_stats: HashMap<String, usize>,
    pub integrity: Option<IntegrityReport>,
    pub sample_entries: Vec<Value>,
    pub executive_summary: String,
    pub metadata: HashMap<String, Value>,
}

impl ComplianceReport {
    /// Serialize as a JSON document with the §6 section layout.
    pub fn to_json(&self) -> Result<String> {
        let value = json!({
            "report_id": self.report_id,
            "generated_at": self.generated_at.to_rfc3339(),
            "period": {
                "start": self.period_start.to_rfc3339(),
                "end": self.period_end.to_rfc3339(),
            },
            "summary": {
                "total_decisions": self.total_decisions,
                "by_type": self.by_type,
                "by_agent": self.by_agent,
                "verification": self.verification_stats,
            },
            "integrity": self.integrity,
            "sample_entries": self.sample_entries,
            "executive_summary": self.executive_summary,
            "metadata": self.metadata,
        });
        Ok(serde_json::to_string_pretty(&value)?)
    }

    /// Render as Markdown for human review.
    pub fn to_markdown(&self) -> String {
        let mut lines = vec![
            "# Compliance Report".to_string(),
            String::new(),
            format!("**Report ID:** {}", self.report_id),
            format!("**Generated:** {}", self.generated_at.to_rfc3339()),
            format!(
                "**Period:** {} to {}",
                self.period_start.date_naive(),
                self.period_end.date_naive()
            ),
            String::new(),
            "## Executive Summary".to_string(),
            String::new(),
            if self.executive_summary.is_empty() {
                "_No summary available_".to_string()
            } else {
                self.executive_summary.clone()
            },
            String::new(),
            "## Statistics".to_string(),
            String::new(),
            format!("**Total Decisions:** {}", self.total_decisions),
            String::new(),
            "### Decisions by Type".to_string(),
            String::new(),
        ];

        let mut by_type: Vec<(&String, &usize)> = self.by_type.iter().collect();
        by_type.sort_by(|a, b| b.1.cmp(a.1));
        for (dtype, count) in by_type {
            lines.push(format!("- {}: {}", dtype, count));
        }

        lines.extend([String::new(), "### Decisions by Agent".to_string(), String::new()]);
        let mut by_agent: Vec<(&String, &usize)> = self.by_agent.iter().collect();
        by_agent.sort_by(|a, b| b.1.cmp(a.1));
        for (agent, count) in by_agent {
            lines.push(format!("- {}: {}", agent, count));
        }

        lines.extend([String::new(), "### Verification Status".to_string(), String::new()]);
        let mut statuses: Vec<(&String, &usize)> = self.verification_stats.iter().collect();
        statuses.sort();
        for (status, count) in statuses {
            lines.push(format!("- {}: {}", status, count));
        }

        lines.extend([String::new(), "## Integrity Verification".to_string(), String::new()]);
        match &self.integrity {
            Some(integrity) => {
                let status = if integrity.verified { "PASSED" } else { "FAILED" };
                lines.push(format!("**Status:** {}", status));
                lines.push(format!("**Entries Checked:** {}", integrity.entries_checked));
                if !integrity.issues.is_empty() {
                    lines.extend([String::new(), "### Issues Found".to_string(), String::new()]);
                    for issue in integrity.issues.iter().take(10) {
                        lines.push(format!("- {}: {:?}", issue.entry_id, issue.kind));
                    }
                }
            }
            None => lines.push("_Integrity check not performed_".to_string()),
        }

        if !self.sample_entries.is_empty() {
            lines.extend([String::new(), "## Sample Entries".to_string(), String::new()]);
            for entry in self.sample_entries.iter().take(5) {
                let get = |key: &str| {
                    entry
                        .get(key)
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown")
                        .to_string()
                };
                lines.extend([
                    format!("### {}", get("entry_id")),
                    format!("- Type: {}", get("decision_type")),
                    format!("- Agent: {}", get("agent_id")),
                    format!("- Time: {}", get("timestamp")),
                    format!("- Action: {}", get("selected_action")),
                    String::new(),
                ]);
            }
        }

        lines.join("\n")
    }
}

/// Options for report generation.
#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub include_samples: bool,
    pub sample_count: usize,
    pub verify_integrity: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            include_samples: true,
            sample_count: 10,
            verify_integrity: true,
        }
    }
}

/// Generates compliance reports from audit trail data.
pub struct ComplianceReportGenerator<'a> {
    manager: &'a AuditTrailManager,
    organization_name: String,
    system_name: String,
}

impl<'a> ComplianceReportGenerator<'a> {
    pub fn new(manager: &'a AuditTrailManager) -> Self {
        Self {
            manager,
            organization_name: String::new(),
            system_name: "Agent Governance Runtime".to_string(),
        }
    }

    pub fn with_names(
        mut self,
        organization_name: impl Into<String>,
        system_name: impl Into<String>,
    ) -> Self {
        self.organization_name = organization_name.into();
        self.system_name = system_name.into();
        self
    }

    /// Generate a compliance report for a time period.
    pub fn generate(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        opts: &ReportOptions,
    ) -> Result<ComplianceReport> {
        let entries = self.manager.entries_in_range(start, end)?;

        let mut by_type: HashMap<String, usize> = HashMap::new();
        let mut by_agent: HashMap<String, usize> = HashMap::new();
        let mut verification_stats: HashMap<String, usize> = HashMap::from([
            ("pending".to_string(), 0),
            ("verified".to_string(), 0),
            ("failed".to_string(), 0),
            ("skipped".to_string(), 0),
        ]);

        for entry in &entries {
            *by_type
                .entry(entry.decision_type.as_str().to_string())
                .or_insert(0) += 1;
            if !entry.agent_id.is_empty() {
                *by_agent.entry(entry.agent_id.clone()).or_insert(0) += 1;
            }
            *verification_stats
                .entry(entry.verification_status.as_str().to_string())
                .or_insert(0) += 1;
        }

        let integrity = if opts.verify_integrity {
            Some(self.manager.verify_integrity()?)
        } else {
            None
        };

        let sample_entries = if opts.include_samples {
            entries
                .iter()
                .take(opts.sample_count)
                .map(Self::sanitize_entry)
                .collect()
        } else {
            Vec::new()
        };

        let executive_summary = self.build_summary(
            entries.len(),
            &by_type,
            &by_agent,
            &verification_stats,
            integrity.as_ref(),
            start,
            end,
        );

        Ok(ComplianceReport {
            report_id: Uuid::new_v4().to_string(),
            generated_at: Utc::now(),
            period_start: start,
            period_end: end,
            total_decisions: entries.len(),
            by_type,
            by_agent,
            verification_stats,
            integrity,
            sample_entries,
            executive_summary,
            metadata: HashMap::from([
                ("organization".to_string(), json!(self.organization_name)),
                ("system".to_string(), json!(self.system_name)),
            ]),
        })
    }

    /// Sanitize an entry for inclusion in a report: hashes and summaries
    /// only, summaries capped at 100 chars.
    fn sanitize_entry(entry: &AuditEntry) -> Value {
        fn cap(s: &str) -> String {
            s.chars().take(100).collect()
        }
        json!({
            "entry_id": entry.entry_id,
            "timestamp": entry.timestamp.to_rfc3339(),
            "decision_type": entry.decision_type.as_str(),
            "agent_id": entry.agent_id,
            "selected_action": entry.selected_action,
            "confidence_score": entry.confidence_score,
            "verification_status": entry.verification_status.as_str(),
            "input_summary": cap(&entry.input_summary),
            "output_summary": cap(&entry.output_summary),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn build_summary(
        &self,
        total: usize,
        by_type: &HashMap<String, usize>,
        by_agent: &HashMap<String, usize>,
        verification_stats: &HashMap<String, usize>,
        integrity: Option<&IntegrityReport>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> String {
        let days = (end - start).num_days().max(1);
        let avg_per_day = total as f64 / days as f64;

        let most_active = by_agent
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(agent, count)| (agent.clone(), *count))
            .unwrap_or(("N/A".to_string(), 0));

        let most_common = by_type
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(dtype, count)| (dtype.clone(), *count))
            .unwrap_or(("N/A".to_string(), 0));

        let verified = verification_stats.get("verified").copied().unwrap_or(0);
        let verification_rate = if total > 0 {
            verified as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        let integrity_status = match integrity {
            Some(report) if report.verified => "PASSED",
            Some(_) => "FAILED",
            None => "NOT CHECKED",
        };

        let mut lines = vec![
            format!(
                "During the reporting period ({} to {}), the {} recorded {} auditable decisions (average {:.1} per day).",
                start.date_naive(),
                end.date_naive(),
                self.system_name,
                total,
                avg_per_day
            ),
            String::new(),
            format!(
                "The most common decision type was '{}' ({} occurrences), and the most active agent was '{}' ({} decisions).",
                most_common.0, most_common.1, most_active.0, most_active.1
            ),
            String::new(),
            format!(
                "Verification coverage: {:.1}% of decisions have been verified.",
                verification_rate
            ),
            format!("Chain integrity status: {}.", integrity_status),
        ];

        if let Some(report) = integrity {
            if !report.verified {
                lines.push(format!(
                    "WARNING: {} integrity issues were detected and require investigation.",
                    report.issues.len()
                ));
            }
        }

        lines.join("\n")
    }

    /// Generate a report scoped to a single agent.
    pub fn generate_agent_report(
        &self,
        agent_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Value> {
        let mut entries = self.manager.storage().entries_by_agent(agent_id)?;
        if let Some(start) = start {
            entries.retain(|e| e.timestamp >= start);
        }
        if let Some(end) = end {
            entries.retain(|e| e.timestamp <= end);
        }

        let mut by_type: HashMap<String, usize> = HashMap::new();
        let mut confidence_scores = Vec::new();
        let mut verification_passed = 0usize;

        for entry in &entries {
            *by_type
                .entry(entry.decision_type.as_str().to_string())
                .or_insert(0) += 1;
            if entry.confidence_score > 0.0 {
                confidence_scores.push(entry.confidence_score);
            }
            if entry.verification_status == VerificationStatus::Verified {
                verification_passed += 1;
            }
        }

        let avg_confidence = if confidence_scores.is_empty() {
            0.0
        } else {
            confidence_scores.iter().sum::<f64>() / confidence_scores.len() as f64
        };

        Ok(json!({
            "agent_id": agent_id,
            "total_decisions": entries.len(),
            "by_type": by_type,
            "average_confidence": avg_confidence,
            "verification_rate": if entries.is_empty() { 0.0 } else {
                verification_passed as f64 / entries.len() as f64
            },
            "first_activity": entries.first().map(|e| e.timestamp.to_rfc3339()),
            "last_activity": entries.last().map(|e| e.timestamp.to_rfc3339()),
        }))
    }

    /// Generate a report scoped to a session, with its decision tree.
    pub fn generate_session_report(&self, session_id: &str) -> Result<Value> {
        let entries = self.manager.storage().entries_by_session(session_id)?;

        let decision_tree: Vec<Value> = entries
            .iter()
            .map(|entry| {
                json!({
                    "entry_id": entry.entry_id,
                    "timestamp": entry.timestamp.to_rfc3339(),
                    "type": entry.decision_type.as_str(),
                    "agent": entry.agent_id,
                    "action": entry.selected_action,
                    "parent": entry.parent_entry_id,
                })
            })
            .collect();

        let duration_seconds = if entries.len() > 1 {
            (entries[entries.len() - 1].timestamp - entries[0].timestamp).num_seconds()
        } else {
            0
        };

        let unique_agents: std::collections::HashSet<&str> = entries
            .iter()
            .filter(|e| !e.agent_id.is_empty())
            .map(|e| e.agent_id.as_str())
            .collect();

        Ok(json!({
            "session_id": session_id,
            "total_decisions": entries.len(),
            "duration_seconds": duration_seconds,
            "unique_agents": unique_agents.len(),
            "decision_tree": decision_tree,
        }))
    }

    /// Export a report in a regulatory-specific format.
    pub fn export_for_regulatory(&self, report: &ComplianceReport, regulation: &str) -> Result<Value> {
        let mut base: Value = serde_json::from_str(&report.to_json()?)?;
        let integrity_verified = report
            .integrity
            .as_ref()
            .map(|i| i.verified)
            .unwrap_or(false);

        match regulation {
            "SOC2" => {
                base["soc2_controls"] = json!({
                    "CC6.1": {
                        "description": "Logical access security",
                        "evidence": format!(
                            "All {} decisions logged with agent identification",
                            report.total_decisions
                        ),
                        "status": if report.total_decisions > 0 { "compliant" } else { "insufficient_data" },
                    },
                    "CC7.2": {
                        "description": "System change monitoring",
                        "evidence": format!("Chain integrity verified: {}", integrity_verified),
                        "status": if integrity_verified { "compliant" } else { "review_required" },
                    },
                });
            }
            "HIPAA" => {
                base["hipaa_safeguards"] = json!({
                    "access_control": {
                        "description": "Unique user identification",
                        "evidence": format!("{} unique agents tracked", report.by_agent.len()),
                        "status": "implemented",
                    },
                    "audit_controls": {
                        "description": "Activity logging",
                        "evidence": format!(
                            "{} activities logged with hashes",
                            report.total_decisions
                        ),
                        "status": "implemented",
                    },
                    "integrity": {
                        "description": "Data integrity controls",
                        "evidence": format!(
                            "Hash chain integrity: {}",
                            if integrity_verified { "verified" } else { "unverified" }
                        ),
                        "status": if integrity_verified { "implemented" } else { "review_required" },
                    },
                });
            }
            _ => {}
        }

        base["regulation"] = json!(regulation);
        base["export_timestamp"] = json!(Utc::now().to_rfc3339());
        Ok(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::entry::DecisionType;
    use crate::audit::manager::RecordOptions;
    use chrono::Duration;

    fn seeded_manager() -> AuditTrailManager {
        let mgr = AuditTrailManager::in_memory();
        for i in 0..4 {
            mgr.record(
                if i % 2 == 0 {
                    DecisionType::ToolInvocation
                } else {
                    DecisionType::OutputGeneration
                },
                if i < 3 { "worker" } else { "planner" },
                &json!({"i": i}),
                &json!({"o": i}),
                RecordOptions::new().with_confidence(0.8),
            )
            .unwrap();
        }
        mgr
    }

    fn period() -> (DateTime<Utc>, DateTime<Utc>) {
        (Utc::now() - Duration::days(1), Utc::now() + Duration::days(1))
    }

    #[test]
    fn test_generate_report() {
        let mgr = seeded_manager();
        let generator = ComplianceReportGenerator::new(&mgr);
        let (start, end) = period();

        let report = generator
            .generate(start, end, &ReportOptions::default())
            .unwrap();

        assert_eq!(report.total_decisions, 4);
        assert_eq!(report.by_type.get("tool_invocation"), Some(&2));
        assert_eq!(report.by_agent.get("worker"), Some(&3));
        assert_eq!(report.verification_stats.get("pending"), Some(&4));
        assert!(report.integrity.as_ref().unwrap().verified);
        assert_eq!(report.sample_entries.len(), 4);
        assert!(report.executive_summary.contains("4 auditable decisions"));
    }

    #[test]
    fn test_markdown_rendering() {
        let mgr = seeded_manager();
        let generator = ComplianceReportGenerator::new(&mgr);
        let (start, end) = period();

        let report = generator
            .generate(start, end, &ReportOptions::default())
            .unwrap();
        let markdown = report.to_markdown();

        assert!(markdown.starts_with("# Compliance Report"));
        assert!(markdown.contains("## Executive Summary"));
        assert!(markdown.contains("**Status:** PASSED"));
        assert!(markdown.contains("- tool_invocation: 2"));
    }

    #[test]
    fn test_json_sections() {
        let mgr = seeded_manager();
        let generator = ComplianceReportGenerator::new(&mgr);
        let (start, end) = period();

        let report = generator
            .generate(start, end, &ReportOptions::default())
            .unwrap();
        let value: Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();

        assert!(value["summary"]["total_decisions"].is_number());
        assert!(value["period"]["start"].is_string());
        assert!(value["integrity"]["verified"].as_bool().unwrap());
    }

    #[test]
    fn test_agent_and_session_reports() {
        let mgr = seeded_manager();
        let generator = ComplianceReportGenerator::new(&mgr);

        let agent_report = generator
            .generate_agent_report("worker", None, None)
            .unwrap();
        assert_eq!(agent_report["total_decisions"], json!(3));
        assert!(agent_report["average_confidence"].as_f64().unwrap() > 0.7);

        let session = mgr.session_id();
        let session_report = generator.generate_session_report(&session).unwrap();
        assert_eq!(session_report["total_decisions"], json!(4));
        assert_eq!(session_report["unique_agents"], json!(2));
    }

    #[test]
    fn test_regulatory_exports() {
        let mgr = seeded_manager();
        let generator = ComplianceReportGenerator::new(&mgr);
        let (start, end) = period();
        let report = generator
            .generate(start, end, &ReportOptions::default())
            .unwrap();

        let soc2 = generator.export_for_regulatory(&report, "SOC2").unwrap();
        assert_eq!(soc2["soc2_controls"]["CC7.2"]["status"], json!("compliant"));
        assert_eq!(soc2["regulation"], json!("SOC2"));

        let hipaa = generator.export_for_regulatory(&report, "HIPAA").unwrap();
        assert_eq!(
            hipaa["hipaa_safeguards"]["integrity"]["status"],
            json!("implemented")
        );
    }
}
