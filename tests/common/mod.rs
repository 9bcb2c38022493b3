//! Scripted fake adapters shared by the behaviour tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use finvista_core::{
    DataSource, DataType, FetchArgs, FetchCoordinator, ManualClock, SourceError, SourceFuture,
    Table,
};
use serde_json::json;

pub const T: DataType = DataType::CN_STOCK_DAILY;

/// What a scripted adapter does on one invocation.
#[derive(Debug, Clone)]
pub enum Step {
    Succeed,
    Fail(SourceError),
    /// Sleeps on the tokio clock, then succeeds.
    Delay(Duration),
    /// Sleeps on the tokio clock, then fails.
    DelayThenFail(Duration, SourceError),
    /// Never completes.
    Hang,
}

/// Adapter that plays back a script of steps, then repeats a fallback step.
#[derive(Debug)]
pub struct ScriptedSource {
    name: String,
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn succeeding(name: &str) -> Arc<Self> {
        Self::scripted(name, [], Step::Succeed)
    }

    pub fn failing(name: &str, error: SourceError) -> Arc<Self> {
        Self::scripted(name, [], Step::Fail(error))
    }

    pub fn scripted<I>(name: &str, steps: I, fallback: Step) -> Arc<Self>
    where
        I: IntoIterator<Item = Step>,
    {
        Arc::new(Self {
            name: name.to_owned(),
            script: Mutex::new(steps.into_iter().collect()),
            fallback,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn adapter(self: &Arc<Self>) -> Arc<dyn DataSource> {
        Arc::clone(self) as Arc<dyn DataSource>
    }

    fn next_step(&self) -> Step {
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl DataSource for ScriptedSource {
    fn fetch<'a>(&'a self, args: &'a FetchArgs) -> SourceFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.next_step() {
                Step::Succeed => Ok(table_from(&self.name, args)),
                Step::Fail(error) => Err(error),
                Step::Delay(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(table_from(&self.name, args))
                }
                Step::DelayThenFail(delay, error) => {
                    tokio::time::sleep(delay).await;
                    Err(error)
                }
                Step::Hang => std::future::pending::<Result<Table, SourceError>>().await,
            }
        })
    }
}

/// One-row table naming the producing source and the requested symbol.
pub fn table_from(source: &str, args: &FetchArgs) -> Table {
    let symbol = args.get_str("symbol").unwrap_or_default();
    Table::new(["source", "symbol", "close"])
        .and_then(|table| table.with_row(vec![json!(source), json!(symbol), json!(10.5)]))
        .expect("valid table")
}

pub fn args(symbol: &str) -> FetchArgs {
    FetchArgs::new().with("symbol", symbol).expect("valid args")
}

/// Coordinator on a manual clock with `chain` registered for [`T`] in order.
pub fn coordinator(
    clock: &ManualClock,
    chain: &[(&str, &Arc<ScriptedSource>)],
) -> FetchCoordinator {
    FetchCoordinator::builder()
        .with_clock(Arc::new(clock.clone()))
        .register_chain(
            T,
            chain
                .iter()
                .map(|(name, source)| (*name, source.adapter()))
                .collect::<Vec<_>>(),
        )
        .build()
        .expect("valid coordinator")
}
