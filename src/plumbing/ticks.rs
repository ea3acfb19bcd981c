//! Time buckets

use super::DEPENDENCY_TICK;
use crate::core::{
    fork_copies, Component, ConfigurationOption, Fact, FactStore, OptionKind, OptionValue,
    Options, Outputs, RunContext,
};
use crate::error::EngineError;
use anyhow::Result;

pub const CONFIG_TICK_SIZE: &str = "TicksSinceStart.TickSize";
pub const DEFAULT_TICK_HOURS: i64 = 24;

/// Tick size in seconds as configured on the run; leaves use it to realign
/// results of different runs.
pub fn tick_seconds(options: &Options) -> Result<i64> {
    let hours = options.int(CONFIG_TICK_SIZE)?.unwrap_or(DEFAULT_TICK_HOURS);
    let invalid = |reason: String| EngineError::InvalidOption {
        option: CONFIG_TICK_SIZE.to_string(),
        reason,
    };
    if hours <= 0 {
        return Err(invalid(format!("must be positive, got {}", hours)).into());
    }
    let seconds = hours
        .checked_mul(3600)
        .ok_or_else(|| invalid(format!("{} hours overflow the tick size in seconds", hours)))?;
    Ok(seconds)
}

/// Start of the tick containing `time`
pub fn floor_to_tick(time: i64, tick_secs: i64) -> i64 {
    time - time.rem_euclid(tick_secs)
}

/// Provides `tick`: whole ticks elapsed between the run start, floored to a
/// tick boundary, and the commit time.
#[derive(Clone)]
pub struct TicksSinceStart {
    tick_secs: i64,
    tick0: i64,
}

impl Default for TicksSinceStart {
    fn default() -> Self {
        Self {
            tick_secs: DEFAULT_TICK_HOURS * 3600,
            tick0: 0,
        }
    }
}

impl TicksSinceStart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick_of(&self, time: i64) -> i64 {
        ((time - self.tick0) / self.tick_secs).max(0)
    }
}

impl Component for TicksSinceStart {
    fn name(&self) -> &'static str {
        "TicksSinceStart"
    }

    fn provides(&self) -> Vec<&'static str> {
        vec![DEPENDENCY_TICK]
    }

    fn requires(&self) -> Vec<&'static str> {
        vec![]
    }

    fn configuration_options(&self) -> Vec<ConfigurationOption> {
        vec![ConfigurationOption {
            name: CONFIG_TICK_SIZE,
            description: "How long each tick is, in hours.",
            flag: "tick-size",
            kind: OptionKind::Int,
            default: OptionValue::Int(DEFAULT_TICK_HOURS),
        }]
    }

    fn configure(&mut self, options: &Options) -> Result<()> {
        self.tick_secs = tick_seconds(options)?;
        Ok(())
    }

    fn initialize(&mut self, ctx: &RunContext<'_>) -> Result<()> {
        let start = ctx.commits.iter().map(|c| c.time).min().unwrap_or(0);
        self.tick0 = floor_to_tick(start, self.tick_secs);
        Ok(())
    }

    fn consume(&mut self, facts: &FactStore) -> Result<Outputs> {
        let tick = self.tick_of(facts.commit()?.time);
        Ok(Outputs::from([(DEPENDENCY_TICK.to_string(), Fact::Int(tick))]))
    }

    fn fork(&self, n: usize) -> Vec<Box<dyn Component>> {
        fork_copies(self, n)
    }
}
