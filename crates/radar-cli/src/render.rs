//! Terminal output: listing cards, the transient status line, the banner.

use chrono::Local;
use console::{pad_str, style, truncate_str, Alignment, Style, Term};
use radar_adapters::site_label;
use radar_core::{Score, Tier};
use radar_sync::{AcceptedListing, ListingSink, Progress, RadarCounters};
use tracing::debug;

const MAX_CARD_WIDTH: usize = 80;
const MAX_STATUS_TITLE: usize = 40;

pub fn tier_style(tier: Tier) -> Style {
    match tier {
        Tier::Rare => Style::new().magenta().bold(),
        Tier::Strong => Style::new().yellow().bold(),
        Tier::Solid => Style::new().blue(),
        Tier::Low => Style::new().white(),
    }
}

/// Pad to `width`, shortening with "..." only when `text` is wider.
fn fit(text: &str, width: usize) -> String {
    if console::measure_text_width(text) > width {
        let shortened = truncate_str(text, width, "...");
        pad_str(&shortened, width, Alignment::Left, None).into_owned()
    } else {
        pad_str(text, width, Alignment::Left, None).into_owned()
    }
}

/// Card header, with the title shortened first when the line overflows.
fn header_text(accepted: &AcceptedListing, inner: usize) -> String {
    let listing = &accepted.listing;
    let site = site_label(&listing.url);
    let frame = format!("{} |  | {} | {}", listing.company, listing.location, site);
    let budget = inner.saturating_sub(console::measure_text_width(&frame));
    let title = if console::measure_text_width(&listing.title) > budget && budget > 3 {
        truncate_str(&listing.title, budget, "...").into_owned()
    } else {
        listing.title.clone()
    };
    format!("{} | {} | {} | {}", listing.company, title, listing.location, site)
}

/// Rationale lines with a colored `+`/`-` marker.
fn rationale_line(line: &str, tier: Style, inner: usize) -> Option<String> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let padded = fit(line, inner);
    let padded = padded.as_str();
    Some(match padded.chars().next() {
        Some(marker @ ('+' | '-')) => {
            format!("{}{}", tier.apply_to(marker), &padded[marker.len_utf8()..])
        }
        _ => padded.to_string(),
    })
}

/// One rounded box per accepted listing; the score sits in the top border.
pub fn render_card(accepted: &AcceptedListing, width: usize) -> Vec<String> {
    let width = width.clamp(24, MAX_CARD_WIDTH);
    let inner = width - 4;
    let tier = tier_style(accepted.tier);
    let border = tier.clone();

    let label = if accepted.assessment.score > Score::MIN {
        format!(" {} ", accepted.assessment.score)
    } else {
        String::new()
    };
    let rule = "─".repeat(width - 3 - label.chars().count());
    let mut lines = vec![border.apply_to(format!("╭{rule}{label}─╮")).to_string()];

    let wrap = |body: String| format!("{} {} {}", border.apply_to("│"), body, border.apply_to("│"));

    let header = fit(&header_text(accepted, inner), inner);
    lines.push(wrap(tier.apply_to(header).to_string()));
    for line in accepted.assessment.rationale.lines() {
        if let Some(body) = rationale_line(line, tier.clone(), inner) {
            lines.push(wrap(body));
        }
    }

    lines.push(border.apply_to(format!("╰{}╯", "─".repeat(width - 2))).to_string());
    lines
}

pub fn status_text(event: &Progress<'_>) -> String {
    match *event {
        Progress::Polling { source } => format!("Polling {source}..."),
        Progress::NoNewListings { source } => format!("{source}: no new jobs"),
        Progress::Scoring { remaining, title } => format!(
            "Scoring ({remaining} pending): {}",
            truncate_str(title, MAX_STATUS_TITLE, "...")
        ),
        Progress::FetchFailed { source, error } => format!("Error fetching from {source}: {error}"),
    }
}

pub struct Banner<'a> {
    pub search_term: &'a str,
    pub location: &'a str,
    pub min_score: Score,
    pub sources: Vec<&'a str>,
    pub scoring: &'a str,
    /// The score gate only applies when scoring is on.
    pub scoring_enabled: bool,
    pub bootstrap: bool,
}

impl Banner<'_> {
    pub fn lines(&self) -> Vec<String> {
        let search = if self.search_term.trim().is_empty() {
            "(all jobs)"
        } else {
            self.search_term
        };
        let mut lines = vec![
            style("Job Radar").bold().to_string(),
            format!("Search: {search}"),
            format!("Location: {}", self.location),
        ];
        if self.scoring_enabled && self.min_score > Score::MIN {
            lines.push(format!("Min score: {}", self.min_score));
        }
        lines.push(format!("Sources: {}", self.sources.join(", ")));
        lines.push(format!("Scoring: {}", self.scoring));
        lines.push(String::new());
        if self.bootstrap {
            lines.push(style("Loading recent jobs...").dim().to_string());
        }
        lines.push(style("Ctrl+C to stop").dim().to_string());
        lines.push(String::new());
        lines
    }
}

pub fn summary_line(counters: &RadarCounters) -> String {
    let tiers: Vec<String> = Tier::ALL
        .iter()
        .map(|tier| format!("{} {}", counters.tier(*tier), tier))
        .collect();
    format!(
        "{} | scored {} | saved {} | discarded {} | scoring failures {}",
        tiers.join(", "),
        counters.scored,
        counters.saved,
        counters.discarded,
        counters.scoring_failures
    )
}

/// Renders to stdout. Write errors are logged and otherwise ignored.
pub struct TerminalSink {
    term: Term,
    status_visible: bool,
}

impl TerminalSink {
    pub fn stdout() -> Self {
        Self {
            term: Term::stdout(),
            status_visible: false,
        }
    }

    fn card_width(&self) -> usize {
        let (_, columns) = self.term.size();
        usize::from(columns).min(MAX_CARD_WIDTH)
    }

    fn clear_status(&mut self) {
        if self.status_visible {
            if let Err(err) = self.term.clear_line() {
                debug!(error = %err, "clearing status line failed");
            }
            self.status_visible = false;
        }
    }

    pub fn line(&mut self, text: &str) {
        self.clear_status();
        if let Err(err) = self.term.write_line(text) {
            debug!(error = %err, "terminal write failed");
        }
    }

    fn status(&mut self, text: &str) {
        self.clear_status();
        let stamped = format!("{} {}", style(Local::now().format("%I:%M %p")).dim(), text);
        let columns = usize::from(self.term.size().1).max(20);
        match self.term.write_str(&truncate_str(&stamped, columns - 1, "")) {
            Ok(()) => self.status_visible = true,
            Err(err) => debug!(error = %err, "status write failed"),
        }
    }

    pub fn finish(&mut self) {
        self.clear_status();
    }
}

impl ListingSink for TerminalSink {
    fn accepted(&mut self, accepted: &AcceptedListing) {
        self.clear_status();
        for line in render_card(accepted, self.card_width()) {
            self.line(&line);
        }
    }

    fn progress(&mut self, event: Progress<'_>) {
        let text = status_text(&event);
        match event {
            Progress::FetchFailed { .. } => self.line(&style(text).red().to_string()),
            _ => self.status(&text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radar_core::{Assessment, Listing};

    fn accepted(score: i64, rationale: &str) -> AcceptedListing {
        let assessment = Assessment {
            score: Score::from_percent(score),
            rationale: rationale.to_string(),
        };
        AcceptedListing {
            listing: Listing::new(
                "indeed",
                "Senior Rust Engineer",
                "Acme",
                "Austin, TX",
                "",
                "https://www.indeed.com/viewjob?jk=1",
                None,
            ),
            tier: Tier::classify(assessment.score),
            assessment,
        }
    }

    #[test]
    fn card_shows_header_score_and_rationale() {
        console::set_colors_enabled(false);
        let lines = render_card(&accepted(85, "+ rust match\n\n- relocation"), 60);

        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with('╭'));
        assert!(lines[0].ends_with(" 85% ─╮"));
        assert!(lines[1].contains("Acme | Senior Rust Engineer | Austin, TX | Indeed"));
        assert!(lines[2].contains("+ rust match"));
        assert!(lines[3].contains("- relocation"));
        assert!(lines.iter().all(|l| console::measure_text_width(l) == 60));
    }

    #[test]
    fn unscored_card_has_no_percentage() {
        console::set_colors_enabled(false);
        let lines = render_card(&accepted(0, ""), 60);
        assert_eq!(lines.len(), 3);
        assert!(!lines[0].contains('%'));
    }

    #[test]
    fn long_titles_are_shortened_to_fit() {
        console::set_colors_enabled(false);
        let mut card = accepted(70, "");
        card.listing.title = "Principal Distributed Systems Engineer, Storage Infrastructure".into();
        let lines = render_card(&card, 50);
        assert!(lines[1].contains("..."));
        assert!(lines[1].contains("| Austin, TX | Indeed"));
        assert_eq!(console::measure_text_width(&lines[1]), 50);
    }

    #[test]
    fn status_text_per_event() {
        assert_eq!(status_text(&Progress::Polling { source: "google" }), "Polling google...");
        assert_eq!(
            status_text(&Progress::NoNewListings { source: "indeed" }),
            "indeed: no new jobs"
        );
        let scoring = status_text(&Progress::Scoring {
            remaining: 3,
            title: &"x".repeat(60),
        });
        assert!(scoring.starts_with("Scoring (3 pending): "));
        assert!(scoring.ends_with("..."));
    }

    #[test]
    fn rationale_that_exactly_fills_the_card_is_kept_whole() {
        console::set_colors_enabled(false);
        let inner = 60 - 4;
        let exact = format!("+ {}end", "x".repeat(inner - 5));
        assert_eq!(console::measure_text_width(&exact), inner);
        let lines = render_card(&accepted(85, &exact), 60);
        assert!(lines[2].contains(&exact));
        assert!(!lines[2].contains("..."));

        let lines = render_card(&accepted(85, &format!("{exact}zz")), 60);
        assert!(lines[2].contains("..."));
        assert_eq!(console::measure_text_width(&lines[2]), 60);
    }

    fn banner(scoring_enabled: bool) -> Banner<'static> {
        Banner {
            search_term: "",
            location: "USA",
            min_score: Score::from_percent(40),
            sources: vec!["indeed", "google"],
            scoring: if scoring_enabled { "enabled (openrouter)" } else { "disabled (no API key)" },
            scoring_enabled,
            bootstrap: true,
        }
    }

    #[test]
    fn banner_lists_search_and_sources() {
        console::set_colors_enabled(false);
        let lines = banner(true).lines();
        assert_eq!(lines[0], "Job Radar");
        assert!(lines.contains(&"Search: (all jobs)".to_string()));
        assert!(lines.contains(&"Min score: 40%".to_string()));
        assert!(lines.contains(&"Sources: indeed, google".to_string()));
        assert!(lines.contains(&"Loading recent jobs...".to_string()));
    }

    #[test]
    fn banner_omits_min_score_when_scoring_is_off() {
        console::set_colors_enabled(false);
        let lines = banner(false).lines();
        assert!(!lines.iter().any(|l| l.starts_with("Min score")));
        assert!(lines.contains(&"Scoring: disabled (no API key)".to_string()));
    }

    #[test]
    fn summary_counts_every_tier() {
        let counters = RadarCounters {
            rare: 1,
            solid: 2,
            scored: 3,
            saved: 1,
            ..Default::default()
        };
        assert_eq!(
            summary_line(&counters),
            "1 rare, 0 strong, 2 solid, 0 low | scored 3 | saved 1 | discarded 0 | scoring failures 0"
        );
    }
}
