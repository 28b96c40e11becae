//! Grant-graph traversals.
//!
//! Delegation, recall and reward all walk the same DAG. The strict
//! level-descent rule bounds every walk by the maximum proxy level, but a
//! node can still fan out widely, so the walks run on an explicit work stack
//! instead of the call stack.

use stakegraph_core::error::StakeError;
use stakegraph_core::math::prop;
use stakegraph_core::types::{AccountId, Balance, Bps, BPS_DENOM};

use crate::tx::LedgerTx;

// ── Spread ───────────────────────────────────────────────────────────────────

struct SpreadFrame {
    account: AccountId,
    /// Value that entered this node.
    amount: Balance,
    /// Portion not yet routed onward. Whatever survives the fan-out lands in
    /// the node's own balance when the frame pops.
    remaining: Balance,
    targets: Vec<(AccountId, Bps)>,
    next: usize,
}

/// Push `amount` of value into `root` and auto-route it down every
/// `pct_bps > 0` grant edge, depth-first.
///
/// Shares are minted at each node the value enters, at the node's current
/// exchange rate, except at the root when `mint_at_root` is false (reward
/// refill: the value raises the rate instead of diluting it). Returns the
/// shares minted at the root, 0 when not minting.
pub(crate) fn spread(
    tx: &mut LedgerTx<'_>,
    root: &AccountId,
    amount: Balance,
    mint_at_root: bool,
) -> Result<Balance, StakeError> {
    let (root_minted, root_targets) = enter(tx, root, amount, mint_at_root)?;
    let mut stack = vec![SpreadFrame {
        account: *root,
        amount,
        remaining: amount,
        targets: root_targets,
        next: 0,
    }];

    while let Some(frame) = stack.last_mut() {
        if frame.next >= frame.targets.len() {
            let account = frame.account;
            let remaining = frame.remaining;
            stack.pop();
            let agent = tx.agent_mut(&account)?;
            agent.set_balance(agent.balance + remaining);
            continue;
        }
        let parent = frame.account;
        let parent_amount = frame.amount;
        let (child, pct) = frame.targets[frame.next];
        frame.next += 1;

        let fanout = prop(parent_amount, pct as Balance, BPS_DENOM);
        if fanout == 0 {
            continue;
        }
        let (child_minted, child_targets) = enter(tx, &child, fanout, true)?;

        let mut edge = tx
            .grant(&parent, &child)?
            .ok_or_else(|| StakeError::NotFound(format!("grant {parent} -> {child}")))?;
        edge.share += child_minted;
        // Lifetime counter, never redeemed against; saturate instead of wrap.
        edge.granted = edge.granted.saturating_add(fanout);
        tx.put_grant(edge);

        // last_mut above still points at the parent frame.
        let frame = stack.last_mut().ok_or_else(|| {
            StakeError::SystemInvariant("spread stack drained mid-dispatch".into())
        })?;
        frame.remaining -= fanout;
        let parent_agent = tx.agent_mut(&parent)?;
        parent_agent.proxied += fanout;

        stack.push(SpreadFrame {
            account: child,
            amount: fanout,
            remaining: fanout,
            targets: child_targets,
            next: 0,
        });
    }

    Ok(if mint_at_root { root_minted } else { 0 })
}

/// Mint shares for `amount` entering `account` and snapshot its auto-route
/// targets. The mint is applied to `shares_sum` immediately so that nested
/// entries see the updated rate; who owns the new shares is the caller's
/// business (edge share for routed value, `own_share` at the root).
fn enter(
    tx: &mut LedgerTx<'_>,
    account: &AccountId,
    amount: Balance,
    mint: bool,
) -> Result<(Balance, Vec<(AccountId, Bps)>), StakeError> {
    let targets: Vec<(AccountId, Bps)> = tx
        .grants_of(account)?
        .into_iter()
        .filter(|g| g.pct_bps > 0)
        .map(|g| (g.agent, g.pct_bps))
        .collect();
    let agent = tx.agent_mut(account)?;
    let minted = if !mint {
        0
    } else if agent.total_funds() == 0 {
        amount
    } else {
        prop(amount, agent.shares_sum, agent.total_funds())
    };
    agent.shares_sum += minted;
    Ok((minted, targets))
}

// ── Reclaim ──────────────────────────────────────────────────────────────────

struct RecallFrame {
    account: AccountId,
    shares: Balance,
    /// `shares_sum` before redemption; the proportion basis for everything
    /// pulled out of this node.
    shares_pre: Balance,
    /// `(child, shares of the child to redeem)` per `share > 0` out-edge.
    targets: Vec<(AccountId, Balance)>,
    next: usize,
    /// Value already collected from visited children.
    acc: Balance,
    parent: Option<usize>,
}

/// Redeem `shares` of `root`'s shares for their current value, recursing
/// proportionally through every capital-bearing out-edge.
///
/// Exact on full drain: redeeming all of `shares_pre` takes the node's whole
/// balance and every child share, leaving no rounding dust behind.
pub(crate) fn reclaim(
    tx: &mut LedgerTx<'_>,
    root: &AccountId,
    shares: Balance,
) -> Result<Balance, StakeError> {
    if shares == 0 {
        return Ok(0);
    }
    let mut stack = vec![enter_recall(tx, root, shares, None)?];
    let mut root_result = 0;

    while let Some(frame) = stack.last_mut() {
        if frame.next < frame.targets.len() {
            let parent = frame.account;
            let (child, to_recall) = frame.targets[frame.next];
            frame.next += 1;
            if to_recall == 0 {
                continue;
            }
            let mut edge = tx
                .grant(&parent, &child)?
                .ok_or_else(|| StakeError::NotFound(format!("grant {parent} -> {child}")))?;
            edge.share -= to_recall;
            if edge.is_empty() {
                tx.delete_grant(&parent, &child);
            } else {
                tx.put_grant(edge);
            }
            let parent_idx = stack.len() - 1;
            let child_frame = enter_recall(tx, &child, to_recall, Some(parent_idx))?;
            stack.push(child_frame);
            continue;
        }

        let frame = match stack.pop() {
            Some(f) => f,
            None => break,
        };
        let full = frame.shares == frame.shares_pre;
        let agent = tx.agent_mut(&frame.account)?;
        let balance_part = if full {
            agent.balance
        } else {
            prop(agent.balance, frame.shares, frame.shares_pre)
        };
        agent.set_balance(agent.balance - balance_part);
        agent.shares_sum = frame.shares_pre - frame.shares;
        if full {
            // Every child share was redeemed too, so no routed value remains;
            // zeroing here absorbs the per-edge floor dust.
            agent.proxied = 0;
        }
        let result = frame.acc + balance_part;
        match frame.parent {
            Some(idx) => {
                stack[idx].acc += result;
                let parent_account = stack[idx].account;
                let parent_agent = tx.agent_mut(&parent_account)?;
                parent_agent.proxied = parent_agent.proxied.saturating_sub(result);
            }
            None => root_result = result,
        }
    }

    Ok(root_result)
}

fn enter_recall(
    tx: &mut LedgerTx<'_>,
    account: &AccountId,
    shares: Balance,
    parent: Option<usize>,
) -> Result<RecallFrame, StakeError> {
    let shares_pre = tx.agent(account)?.shares_sum;
    if shares > shares_pre {
        return Err(StakeError::SystemInvariant(format!(
            "agent {account}: redeeming {shares} of {shares_pre} shares"
        )));
    }
    let targets = tx
        .grants_of(account)?
        .into_iter()
        .filter(|g| g.share > 0)
        .map(|g| (g.agent, prop(g.share, shares, shares_pre)))
        .collect();
    Ok(RecallFrame { account: *account, shares, shares_pre, targets, next: 0, acc: 0, parent })
}

// ── Refresh ──────────────────────────────────────────────────────────────────

/// Re-derive the cached `proxied` figure for `root` and everything below it
/// from current child exchange rates.
///
/// Rewards raise a child's rate without touching its grantors, so a parent's
/// cached `proxied` goes stale downward over time. Recomputing bottom-up
/// (children before parents, proxy levels ascending) makes each node's
/// `total_funds` exact before anything above it reads it.
pub(crate) fn refresh_proxied(tx: &mut LedgerTx<'_>, root: &AccountId) -> Result<(), StakeError> {
    let mut seen = std::collections::BTreeSet::new();
    let mut queue = vec![*root];
    let mut nodes: Vec<(u8, AccountId)> = Vec::new();
    while let Some(account) = queue.pop() {
        if !seen.insert(account) {
            continue;
        }
        nodes.push((tx.agent(&account)?.proxy_level, account));
        for g in tx.grants_of(&account)? {
            if g.share > 0 {
                queue.push(g.agent);
            }
        }
    }
    nodes.sort();

    for (_, account) in nodes {
        let mut proxied = 0;
        for g in tx.grants_of(&account)? {
            if g.share == 0 {
                continue;
            }
            let child = tx.agent(&g.agent)?;
            proxied += prop(child.total_funds(), g.share, child.shares_sum);
        }
        tx.agent_mut(&account)?.proxied = proxied;
    }
    Ok(())
}
