//! Atomicity violation on a bank account.
//!
//! A depositor adds 1 and the master withdraws 2 from a balance of 10. Each
//! side reads the balance in one critical section and writes it in another,
//! so under free scheduling the result may be 8, 9 or 11.

use super::{join_all, ScenarioOutcome, TraceEvent};
use crate::config::ScenarioConfig;
use crate::error::ScenarioError;
use lockstep_runtime::{DetMutex, Runtime, SyncError};
use std::sync::Arc;

const OPENING_BALANCE: i64 = 10;

/// Work charged to the master for creating the depositor.
const SPAWN_WORK: u64 = 1_000;

#[derive(Default)]
struct Account {
    balance: i64,
    trace: Vec<TraceEvent>,
}

fn transfer(rt: &Runtime, account: &DetMutex<Account>, amount: i64) -> Result<(), SyncError> {
    let balance = {
        let mut acct = account.lock()?;
        let balance = acct.balance;
        acct.trace.push(TraceEvent::new(rt, balance));
        balance
    };
    rt.tick(5);
    let mut acct = account.lock()?;
    acct.balance = balance + amount;
    let written = acct.balance;
    acct.trace.push(TraceEvent::new(rt, written));
    Ok(())
}

pub(super) fn run(rt: &Runtime, _config: &ScenarioConfig) -> Result<ScenarioOutcome, ScenarioError> {
    let account = Arc::new(DetMutex::new(
        rt,
        Account {
            balance: OPENING_BALANCE,
            ..Account::default()
        },
    ));

    let depositor = {
        let rt2 = rt.clone();
        let account = Arc::clone(&account);
        rt.spawn(move || transfer(&rt2, &account, 1))?
    };
    rt.tick(SPAWN_WORK);
    transfer(rt, &account, -2)?;
    join_all(vec![depositor])?;

    let acct = account.lock()?;
    Ok(ScenarioOutcome {
        trace: acct.trace.clone(),
        result: acct.balance,
        expected: Some(OPENING_BALANCE - 1),
    })
}
