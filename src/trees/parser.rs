// src/trees/parser.rs
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::trees::{ScheduleEvents, SpeciesAges, StandEvents, TreeEvents};

/// Tokens on a year header line: `stand schedule year`.
const YEAR_HEADER_TOKENS: usize = 3;
const SPECIES_TOKEN: usize = 1;
const AGE_TOKEN: usize = 5;

/// Schedule block currently being read.
struct OpenSchedule {
    stand: f64,
    number: u32,
    first_line: usize,
    year: Option<u32>,
    events: ScheduleEvents,
}

impl OpenSchedule {
    fn apply(&mut self, tokens: &[&str], path: &Path, line_no: usize) -> Result<()> {
        if tokens.len() == YEAR_HEADER_TOKENS {
            let year = parse_token::<u32>(tokens, 2, "year", path, line_no)?;
            self.events.years.insert(year, SpeciesAges::default());
            self.year = Some(year);
            return Ok(());
        }

        let Some(year) = self.year else {
            warn!(
                line = line_no,
                stand = self.stand,
                schedule = self.number,
                "cohort line before the first year header, skipped"
            );
            return Ok(());
        };

        if tokens.len() <= AGE_TOKEN {
            return Err(PipelineError::format(
                path,
                format!("line {}", line_no),
                format!(
                    "cohort line needs at least {} tokens, found {}",
                    AGE_TOKEN + 1,
                    tokens.len()
                ),
            ));
        }
        let species = parse_token::<u32>(tokens, SPECIES_TOKEN, "species", path, line_no)?;
        let age = parse_finite(tokens, AGE_TOKEN, "age", path, line_no)?;
        self.events
            .years
            .entry(year)
            .or_default()
            .0
            .insert(species, age);
        Ok(())
    }
}

/// Line-at-a-time parser for the simulator's tree log.
///
/// The log has no explicit delimiters:
/// - one empty line ends a schedule block,
/// - two consecutive empty lines end a stand block,
/// - a 3-token line `stand schedule year` opens a year,
/// - any other line is a cohort: token 2 is the species, token 6 the age.
///
/// End of input closes whatever is still open, so a log without stand separators is a
/// single stand.
pub struct TreeLogParser {
    path: PathBuf,
    line_no: usize,
    blank_run: usize,
    schedule: Option<OpenSchedule>,
    stand: Option<StandEvents>,
    events: TreeEvents,
}

impl TreeLogParser {
    /// `path` only labels errors.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            line_no: 0,
            blank_run: 0,
            schedule: None,
            stand: None,
            events: TreeEvents::default(),
        }
    }

    pub fn process_line(&mut self, line: &str) -> Result<()> {
        self.line_no += 1;
        let tokens: Vec<&str> = line.split_whitespace().collect();

        if tokens.is_empty() {
            self.blank_run += 1;
            match self.blank_run {
                1 => self.close_schedule()?,
                2 => self.close_stand(),
                _ => {}
            }
            return Ok(());
        }
        self.blank_run = 0;

        let schedule = match self.schedule.take() {
            Some(open) => open,
            None => self.open_schedule(&tokens)?,
        };
        let schedule = self.schedule.insert(schedule);
        schedule.apply(&tokens, &self.path, self.line_no)
    }

    fn open_schedule(&self, tokens: &[&str]) -> Result<OpenSchedule> {
        let stand = parse_finite(tokens, 0, "stand id", &self.path, self.line_no)?;
        let number = parse_token::<u32>(tokens, 1, "schedule", &self.path, self.line_no)?;
        Ok(OpenSchedule {
            stand,
            number,
            first_line: self.line_no,
            year: None,
            events: ScheduleEvents::default(),
        })
    }

    fn close_schedule(&mut self) -> Result<()> {
        let Some(open) = self.schedule.take() else {
            return Ok(());
        };
        if open.year.is_none() {
            return Err(PipelineError::format(
                &self.path,
                format!("line {}", open.first_line),
                format!(
                    "schedule {} of stand {} has no year header",
                    open.number, open.stand
                ),
            ));
        }

        // the first schedule line of a stand block names the stand
        let stand = self.stand.get_or_insert_with(|| StandEvents {
            stand: open.stand,
            schedules: BTreeMap::new(),
        });
        stand.schedules.insert(open.number, open.events);
        Ok(())
    }

    fn close_stand(&mut self) {
        if let Some(stand) = self.stand.take() {
            debug!(
                stand = stand.stand,
                schedules = stand.schedules.len(),
                "closed stand block"
            );
            self.events.insert(stand);
        }
    }

    pub fn finish(mut self) -> Result<TreeEvents> {
        self.close_schedule()?;
        self.close_stand();
        Ok(self.events)
    }
}

fn parse_token<T: FromStr>(
    tokens: &[&str],
    index: usize,
    what: &str,
    path: &Path,
    line_no: usize,
) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    let token = tokens.get(index).ok_or_else(|| {
        PipelineError::format(
            path,
            format!("line {}", line_no),
            format!("missing {} (token {})", what, index + 1),
        )
    })?;
    token.parse::<T>().map_err(|e| {
        PipelineError::format(
            path,
            format!("line {} token {}", line_no, index + 1),
            format!("invalid {} `{}`: {}", what, token, e),
        )
    })
}

/// Like `parse_token`, but NaN and infinities are rejected; they cannot be written to
/// `trees.json`.
fn parse_finite(
    tokens: &[&str],
    index: usize,
    what: &str,
    path: &Path,
    line_no: usize,
) -> Result<f64> {
    let value = parse_token::<f64>(tokens, index, what, path, line_no)?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(PipelineError::format(
            path,
            format!("line {} token {}", line_no, index + 1),
            format!("{} `{}` is not finite", what, tokens[index]),
        ))
    }
}

pub fn parse_tree_log(text: &str, path: &Path) -> Result<TreeEvents> {
    let mut parser = TreeLogParser::new(path);
    for line in text.lines() {
        parser.process_line(line)?;
    }
    parser.finish()
}
