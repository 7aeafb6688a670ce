//! One archiving pass over the configured talk page.
//!
//! The pass reads the talk page and the current month's archive page, moves
//! every section that [`decide`] marks for archiving, and saves both pages.
//! Nothing is written when no section qualifies.

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ArchiveConfig;
use crate::decision::decide;
use crate::mediawiki::WikiApi;
use crate::review::Reviewer;
use crate::sections::SectionSplitter;

const SECTION_GAP: &str = "\n\n";

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveOptions {
    /// Show each diff and ask before saving either page.
    pub confirm: bool,
    /// Show diffs and summaries without asking.
    pub show_diff: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Disabled,
    NothingChanged,
    Archived,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveReport {
    pub status: RunStatus,
    pub run_at: DateTime<Utc>,
    pub main_page: String,
    pub archive_page: Option<String>,
    pub archived_sections: Vec<String>,
    pub kept_sections: Vec<String>,
    pub main_summary: Option<String>,
    pub archive_summary: Option<String>,
    pub main_saved: bool,
    pub archive_saved: bool,
}

impl ArchiveReport {
    fn new(status: RunStatus, run_at: DateTime<Utc>, main_page: &str) -> Self {
        Self {
            status,
            run_at,
            main_page: main_page.to_string(),
            archive_page: None,
            archived_sections: Vec::new(),
            kept_sections: Vec::new(),
            main_summary: None,
            archive_summary: None,
            main_saved: false,
            archive_saved: false,
        }
    }

    pub fn archived_count(&self) -> usize {
        self.archived_sections.len()
    }
}

/// New page text for both pages after moving qualifying sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivePlan {
    pub main_text: String,
    pub archive_text: String,
    pub archived: Vec<String>,
    pub kept: Vec<String>,
}

/// Text of a fresh archive page for `main_page`.
pub fn archive_seed(main_page: &str) -> String {
    format!("{{{{Talk archive|{main_page}}}}}")
}

/// Partition the sections of `main_text` between the talk page and `archive_text`.
///
/// The preamble and every section are trimmed and joined with one blank line;
/// each side keeps the original section order.
pub fn plan_archive(
    main_text: &str,
    archive_text: &str,
    splitter: &SectionSplitter,
    now: DateTime<Utc>,
) -> Result<ArchivePlan> {
    let page = splitter.split(main_text);
    debug!("found {} sections", page.sections.len());

    let mut plan = ArchivePlan {
        main_text: page.preamble.trim().to_string(),
        archive_text: archive_text.to_string(),
        archived: Vec::new(),
        kept: Vec::new(),
    };

    for section in &page.sections {
        let title = section.title();
        let text = section.text().trim();
        debug!("run {title}");

        let decision = decide(text, now).with_context(|| format!("cannot classify {title}"))?;
        debug!(decision = decision.as_str(), "classified {title}");
        if decision.should_archive() {
            info!("archive {title}");
            append_section(&mut plan.archive_text, text);
            plan.archived.push(title.to_string());
        } else {
            append_section(&mut plan.main_text, text);
            plan.kept.push(title.to_string());
        }
    }

    Ok(plan)
}

fn append_section(buffer: &mut String, section: &str) {
    if !buffer.is_empty() {
        buffer.push_str(SECTION_GAP);
    }
    buffer.push_str(section);
}

/// Run one archiving pass with run-start time taken from `clock`.
pub fn archive_talk_page<A: WikiApi, R: Reviewer>(
    api: &mut A,
    reviewer: &mut R,
    config: &ArchiveConfig,
    clock: &dyn Clock,
    splitter: &SectionSplitter,
    options: &ArchiveOptions,
) -> Result<ArchiveReport> {
    info!("start");
    let now = clock.now();
    if !config.enable {
        warn!("disabled");
        return Ok(ArchiveReport::new(
            RunStatus::Disabled,
            now,
            &config.main_page_name,
        ));
    }

    let main_before = api
        .read_page(&config.main_page_name)
        .with_context(|| format!("failed to read {}", config.main_page_name))?;

    let archive_title = config
        .archive_page_title(now.year(), now.month())
        .context("failed to render archive page title")?;
    debug!("archive page: {archive_title}");
    let archive_before = api
        .read_page(&archive_title)
        .with_context(|| format!("failed to read {archive_title}"))?;
    let archive_base = if archive_before.is_empty() {
        archive_seed(&config.main_page_name)
    } else {
        archive_before.clone()
    };

    let plan = plan_archive(&main_before, &archive_base, splitter, now)?;
    let mut report = ArchiveReport::new(RunStatus::NothingChanged, now, &config.main_page_name);
    report.archive_page = Some(archive_title.clone());
    report.kept_sections = plan.kept;
    report.archived_sections = plan.archived;

    if report.archived_sections.is_empty() {
        info!("nothing changed");
        return Ok(report);
    }
    report.status = RunStatus::Archived;

    let count = report.archived_count();
    let main_summary = config
        .main_summary(count)
        .context("failed to render main page summary")?;
    let archive_summary = config
        .archive_summary(count)
        .context("failed to render archive page summary")?;

    report.main_saved = save_page(
        api,
        reviewer,
        options,
        &PageEdit {
            label: "main",
            title: &config.main_page_name,
            before: &main_before,
            after: &plan.main_text,
            summary: &main_summary,
        },
    )?;
    report.archive_saved = save_page(
        api,
        reviewer,
        options,
        &PageEdit {
            label: "archive",
            title: &archive_title,
            before: &archive_before,
            after: &plan.archive_text,
            summary: &archive_summary,
        },
    )?;
    report.main_summary = Some(main_summary);
    report.archive_summary = Some(archive_summary);

    info!("done");
    Ok(report)
}

struct PageEdit<'a> {
    label: &'a str,
    title: &'a str,
    before: &'a str,
    after: &'a str,
    summary: &'a str,
}

fn save_page<A: WikiApi, R: Reviewer>(
    api: &mut A,
    reviewer: &mut R,
    options: &ArchiveOptions,
    edit: &PageEdit<'_>,
) -> Result<bool> {
    if options.confirm || options.show_diff {
        reviewer.show_diff(edit.title, edit.before, edit.after)?;
        info!("{} summary: {}", edit.label, edit.summary);
    }

    if options.confirm {
        let question = format!("Save changes for {} page?", edit.label);
        if !reviewer.confirm(&question, true)? {
            debug!("skip save");
            return Ok(false);
        }
    }

    debug!("save changes");
    api.write_page(edit.title, edit.after, edit.summary, false)
        .with_context(|| format!("failed to save {}", edit.title))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, VecDeque};

    use chrono::{TimeDelta, TimeZone};

    use super::*;

    const MAIN: &str = "Project:Bot requests";
    const ARCHIVE: &str = "Project:Bot requests/Archive/2025/6";

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Edit {
        title: String,
        text: String,
        summary: String,
        minor: bool,
    }

    #[derive(Default)]
    struct MockApi {
        pages: BTreeMap<String, String>,
        edits: Vec<Edit>,
        fail_writes_for: Option<String>,
        request_count: usize,
    }

    impl MockApi {
        fn with_page(mut self, title: &str, text: &str) -> Self {
            self.pages.insert(title.to_string(), text.to_string());
            self
        }
    }

    impl WikiApi for MockApi {
        fn login(&mut self, _username: &str, _password: &str) -> Result<()> {
            self.request_count += 1;
            Ok(())
        }

        fn read_page(&mut self, title: &str) -> Result<String> {
            self.request_count += 1;
            Ok(self.pages.get(title).cloned().unwrap_or_default())
        }

        fn write_page(&mut self, title: &str, text: &str, summary: &str, minor: bool) -> Result<()> {
            self.request_count += 1;
            if self.fail_writes_for.as_deref() == Some(title) {
                anyhow::bail!("MediaWiki API error [protectedpage]: protected");
            }
            self.edits.push(Edit {
                title: title.to_string(),
                text: text.to_string(),
                summary: summary.to_string(),
                minor,
            });
            self.pages.insert(title.to_string(), text.to_string());
            Ok(())
        }

        fn request_count(&self) -> usize {
            self.request_count
        }
    }

    #[derive(Default)]
    struct ScriptedReviewer {
        answers: VecDeque<bool>,
        diffs: Vec<String>,
        questions: Vec<String>,
    }

    impl Reviewer for ScriptedReviewer {
        fn show_diff(&mut self, title: &str, _old: &str, _new: &str) -> Result<()> {
            self.diffs.push(title.to_string());
            Ok(())
        }

        fn confirm(&mut self, question: &str, default: bool) -> Result<bool> {
            self.questions.push(question.to_string());
            Ok(self.answers.pop_front().unwrap_or(default))
        }
    }

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 30, 12, 0, 0)
            .single()
            .expect("valid now")
    }

    fn config() -> ArchiveConfig {
        ArchiveConfig {
            enable: true,
            main_page_name: MAIN.to_string(),
            archive_page_name: "Project:Bot requests/Archive/{0}/{1}".to_string(),
            main_page_summary: "Archived {0} thread(s)".to_string(),
            archive_page_summary: "Archived {0} thread(s) from [[Project:Bot requests]]"
                .to_string(),
        }
    }

    fn stamp(days_ago: i64) -> String {
        let at = now() - TimeDelta::days(days_ago);
        format!(
            "{} (一) {} (UTC)",
            at.format("%Y年%-m月%-d日"),
            at.format("%H:%M")
        )
    }

    fn section(title: &str, days_ago: i64, extra: &str) -> String {
        format!(
            "== {title} ==\nRequest text. {extra}--[[User:A|A]] {}\n",
            stamp(days_ago)
        )
    }

    fn talk_page() -> String {
        format!(
            "{{{{Bot requests header}}}}\n\n{}\n{}\n{}",
            section("Old idle", 200, ""),
            section("Ongoing", 2, "{{Done}} "),
            section("Finished", 20, "{{Done}} "),
        )
    }

    fn run(
        api: &mut MockApi,
        reviewer: &mut ScriptedReviewer,
        options: ArchiveOptions,
    ) -> Result<ArchiveReport> {
        archive_talk_page(
            api,
            reviewer,
            &config(),
            &FixedClock(now()),
            &SectionSplitter::new(),
            &options,
        )
    }

    #[test]
    fn moves_qualifying_sections_and_saves_both_pages() {
        let mut api = MockApi::default()
            .with_page(MAIN, &talk_page())
            .with_page(ARCHIVE, "{{Talk archive|Project:Bot requests}}\n\n== Earlier ==\nold");
        let mut reviewer = ScriptedReviewer::default();

        let report = run(&mut api, &mut reviewer, ArchiveOptions::default()).expect("run");

        assert_eq!(report.status, RunStatus::Archived);
        assert_eq!(report.archived_count(), 2);
        assert_eq!(report.archived_sections, vec!["== Old idle ==", "== Finished =="]);
        assert_eq!(report.kept_sections, vec!["== Ongoing =="]);
        assert!(report.main_saved && report.archive_saved);
        assert!(reviewer.diffs.is_empty());
        assert!(reviewer.questions.is_empty());

        assert_eq!(api.edits.len(), 2);
        let main = &api.edits[0];
        assert_eq!(main.title, MAIN);
        assert_eq!(
            main.text,
            format!(
                "{{{{Bot requests header}}}}\n\n{}",
                section("Ongoing", 2, "{{Done}} ").trim()
            )
        );
        assert_eq!(main.summary, "Archived 2 thread(s)");
        assert!(!main.minor);

        let archive = &api.edits[1];
        assert_eq!(archive.title, ARCHIVE);
        assert_eq!(
            archive.text,
            format!(
                "{{{{Talk archive|Project:Bot requests}}}}\n\n== Earlier ==\nold\n\n{}\n\n{}",
                section("Old idle", 200, "").trim(),
                section("Finished", 20, "{{Done}} ").trim()
            )
        );
        assert_eq!(
            archive.summary,
            "Archived 2 thread(s) from [[Project:Bot requests]]"
        );
    }

    #[test]
    fn seeds_missing_archive_page() {
        let mut api = MockApi::default().with_page(MAIN, &talk_page());
        let mut reviewer = ScriptedReviewer::default();

        run(&mut api, &mut reviewer, ArchiveOptions::default()).expect("run");

        let archive = api.pages.get(ARCHIVE).expect("archive saved");
        assert!(archive.starts_with("{{Talk archive|Project:Bot requests}}\n\n== Old idle =="));
    }

    #[test]
    fn nothing_to_archive_writes_nothing() {
        let text = format!("intro\n\n{}", section("Fresh", 1, ""));
        let mut api = MockApi::default().with_page(MAIN, &text);
        let mut reviewer = ScriptedReviewer::default();

        let report = run(
            &mut api,
            &mut reviewer,
            ArchiveOptions {
                confirm: true,
                show_diff: true,
            },
        )
        .expect("run");

        assert_eq!(report.status, RunStatus::NothingChanged);
        assert_eq!(report.main_summary, None);
        assert_eq!(report.archive_summary, None);
        assert!(api.edits.is_empty());
        assert!(reviewer.diffs.is_empty());
    }

    #[test]
    fn disabled_config_reads_nothing() {
        let mut api = MockApi::default().with_page(MAIN, &talk_page());
        let mut reviewer = ScriptedReviewer::default();
        let mut disabled = config();
        disabled.enable = false;

        let report = archive_talk_page(
            &mut api,
            &mut reviewer,
            &disabled,
            &FixedClock(now()),
            &SectionSplitter::new(),
            &ArchiveOptions::default(),
        )
        .expect("run");

        assert_eq!(report.status, RunStatus::Disabled);
        assert_eq!(api.request_count(), 0);
    }

    #[test]
    fn confirm_mode_can_skip_each_write() {
        let mut api = MockApi::default().with_page(MAIN, &talk_page());
        let mut reviewer = ScriptedReviewer {
            answers: VecDeque::from([false, true]),
            ..ScriptedReviewer::default()
        };

        let report = run(
            &mut api,
            &mut reviewer,
            ArchiveOptions {
                confirm: true,
                show_diff: false,
            },
        )
        .expect("run");

        assert_eq!(reviewer.diffs, vec![MAIN.to_string(), ARCHIVE.to_string()]);
        assert_eq!(
            reviewer.questions,
            vec![
                "Save changes for main page?".to_string(),
                "Save changes for archive page?".to_string()
            ]
        );
        assert!(!report.main_saved);
        assert!(report.archive_saved);
        assert_eq!(api.edits.len(), 1);
        assert_eq!(api.edits[0].title, ARCHIVE);
    }

    #[test]
    fn show_diff_without_confirm_never_prompts() {
        let mut api = MockApi::default().with_page(MAIN, &talk_page());
        let mut reviewer = ScriptedReviewer::default();

        run(
            &mut api,
            &mut reviewer,
            ArchiveOptions {
                confirm: false,
                show_diff: true,
            },
        )
        .expect("run");

        assert_eq!(reviewer.diffs.len(), 2);
        assert!(reviewer.questions.is_empty());
        assert_eq!(api.edits.len(), 2);
    }

    #[test]
    fn failed_main_write_aborts_before_archive_write() {
        let mut api = MockApi {
            fail_writes_for: Some(MAIN.to_string()),
            ..MockApi::default()
        }
        .with_page(MAIN, &talk_page());
        let mut reviewer = ScriptedReviewer::default();

        let error = run(&mut api, &mut reviewer, ArchiveOptions::default()).expect_err("must fail");
        assert!(format!("{error:#}").contains("failed to save Project:Bot requests"));
        assert!(api.edits.is_empty());
    }

    #[test]
    fn malformed_timestamp_aborts_before_any_write() {
        let text = format!(
            "{}\n== Broken ==\nx 2025年2月30日 (日) 10:00 (UTC)\n",
            section("Old idle", 200, "")
        );
        let mut api = MockApi::default().with_page(MAIN, &text);
        let mut reviewer = ScriptedReviewer::default();

        let error = run(&mut api, &mut reviewer, ArchiveOptions::default()).expect_err("must fail");
        assert!(format!("{error:#}").contains("cannot classify == Broken =="));
        assert!(api.edits.is_empty());
    }

    #[test]
    fn plan_keeps_every_section_exactly_once() {
        let splitter = SectionSplitter::with_separator("@@split@@");
        let plan = plan_archive(&talk_page(), "", &splitter, now()).expect("plan");

        assert_eq!(plan.archived.len() + plan.kept.len(), 3);
        assert_eq!(plan.main_text.matches("== Ongoing ==").count(), 1);
        assert_eq!(plan.archive_text.matches("== Old idle ==").count(), 1);
        assert_eq!(plan.archive_text.matches("== Finished ==").count(), 1);
        assert!(!plan.main_text.contains("== Finished =="));
        assert!(plan.archive_text.starts_with("== Old idle =="));
    }

    #[test]
    fn quoted_full_width_stamp_does_not_block_archiving() {
        let text = format!(
            "{}{}\n== Quoted ==\n> ２０２４年3月5日 (二) 08:15 (UTC)\nreply --[[User:B|B]] {}\n",
            section("Old idle", 200, ""),
            section("Ongoing", 2, ""),
            stamp(1)
        );
        let plan = plan_archive(&text, "", &SectionSplitter::new(), now()).expect("plan");
        assert_eq!(plan.archived, vec!["== Old idle =="]);
        assert_eq!(plan.kept, vec!["== Ongoing ==", "== Quoted =="]);
    }

    #[test]
    fn empty_preamble_adds_no_leading_gap() {
        let text = format!("{}{}", section("Fresh", 1, ""), section("Old", 300, ""));
        let plan = plan_archive(&text, "seed", &SectionSplitter::new(), now()).expect("plan");
        assert!(plan.main_text.starts_with("== Fresh =="));
        assert!(plan.archive_text.starts_with("seed\n\n== Old =="));
    }

    #[test]
    fn archive_seed_references_main_page() {
        assert_eq!(archive_seed("Talk:Foo"), "{{Talk archive|Talk:Foo}}");
    }
}
