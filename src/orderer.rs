//! Ordering of physically coupled components within one power request.
//!
//! A router module powers its network board. Powering on, the module goes
//! first and the board follows it; powering off, the board goes first.
//! A module named without its board pulls the board into the request.

use crate::model::{NodeInfo, PowerAction};

use async_trait::async_trait;
use itertools::Itertools;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Hardware class of a cabinet, as reported by the inventory service.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CabinetClass {
    River,
    Mountain,
    Hill,
}

impl fmt::Display for CabinetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CabinetClass::River => "River",
            CabinetClass::Mountain => "Mountain",
            CabinetClass::Hill => "Hill",
        };
        f.write_str(name)
    }
}

/// Inventory lookups the orderer needs.
#[async_trait]
pub trait Inventory: Send + Sync {
    /// `None` when the component is unknown.
    async fn cabinet_class(&self, xname: &str) -> Option<CabinetClass>;

    /// Descriptor for a component pulled into a request by [`reorder`].
    async fn component(&self, xname: &str) -> Option<NodeInfo>;
}

/// Inventory from fixed tables: cabinet classes keyed by cabinet xname
/// (`x1000`) and component descriptors keyed by xname.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticInventory {
    pub cabinets: HashMap<String, CabinetClass>,
    #[serde(default)]
    pub components: HashMap<String, NodeInfo>,
}

#[async_trait]
impl Inventory for StaticInventory {
    async fn cabinet_class(&self, xname: &str) -> Option<CabinetClass> {
        let cabinet = segments(xname)?.first().map(|(_, text)| *text)?;
        self.cabinets.get(cabinet).copied()
    }

    async fn component(&self, xname: &str) -> Option<NodeInfo> {
        self.components.get(xname).cloned()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum XnameKind {
    RouterModule,
    HSNBoard,
    Other,
}

/// Splits `x1000c0r3e0` into `[('x', "x1000"), ('c', "x1000c0"), ...]`:
/// each segment's letter with the xname prefix ending at that segment.
fn segments(xname: &str) -> Option<Vec<(char, &str)>> {
    let mut out = Vec::new();
    let mut chars = xname.char_indices().peekable();
    while let Some((_, letter)) = chars.next() {
        if !letter.is_ascii_lowercase() {
            return None;
        }
        let mut end = None;
        while let Some(&(idx, c)) = chars.peek() {
            if !c.is_ascii_digit() {
                break;
            }
            end = Some(idx + 1);
            chars.next();
        }
        out.push((letter, &xname[..end?]));
    }
    Some(out)
}

#[must_use]
pub fn xname_kind(xname: &str) -> XnameKind {
    let Some(segs) = segments(xname) else {
        return XnameKind::Other;
    };
    let letters: String = segs.iter().map(|(letter, _)| letter).collect();
    match letters.as_str() {
        "xcr" => XnameKind::RouterModule,
        "xcre" => XnameKind::HSNBoard,
        _ => XnameKind::Other,
    }
}

/// Parent component, or `None` for a cabinet or an unparsable name.
#[must_use]
pub fn xname_parent(xname: &str) -> Option<&str> {
    let segs = segments(xname)?;
    if segs.len() < 2 {
        return None;
    }
    Some(segs[segs.len() - 2].1)
}

/// The network board a router module powers.
#[must_use]
pub fn board_of(module: &str) -> String {
    format!("{module}e0")
}

/// Orders and expands `targets` so boards and their modules transition in
/// a safe order for `action`. Input that is already correctly ordered comes
/// back unchanged. Duplicates are dropped; only on and off are affected.
pub async fn reorder(
    targets: &[String],
    action: PowerAction,
    inventory: &dyn Inventory,
) -> Vec<String> {
    let mut out: Vec<String> = targets.iter().cloned().unique().collect();
    if !action.is_on() && !action.is_off() {
        return out;
    }

    let modules: Vec<String> = out
        .iter()
        .filter(|x| xname_kind(x) == XnameKind::RouterModule)
        .cloned()
        .collect();

    for module in modules {
        match inventory.cabinet_class(&module).await {
            Some(CabinetClass::Mountain | CabinetClass::Hill) => {}
            Some(CabinetClass::River) => {
                info!("{module}: River cabinet, no dependent board handling");
                continue;
            }
            None => {
                info!("Notice: Could not determine the cabinet type of {module}");
                continue;
            }
        }

        let board = board_of(&module);
        let Some(mi) = out.iter().position(|x| *x == module) else {
            continue;
        };
        match out.iter().position(|x| *x == board) {
            Some(bi) if action.is_on() && bi < mi => {
                let board = out.remove(bi);
                // module shifted left by one; slot mi is right after it
                out.insert(mi, board);
            }
            Some(bi) if action.is_off() && bi > mi => {
                let board = out.remove(bi);
                out.insert(mi, board);
            }
            Some(_) => {}
            None if action.is_on() => {
                info!("{module}: adding dependent {board} after it");
                out.insert(mi + 1, board);
            }
            None => {
                info!("{module}: adding dependent {board} before it");
                out.insert(mi, board);
            }
        }
    }
    out
}

/// Splits an ordered target list into sequential rounds so that a board and
/// its router module never run in the same round.
#[must_use]
pub fn dispatch_rounds(ordered: &[String]) -> Vec<Vec<String>> {
    let mut rounds: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut in_round: HashSet<String> = HashSet::new();

    for xname in ordered {
        let partner = match xname_kind(xname) {
            XnameKind::RouterModule => Some(board_of(xname)),
            XnameKind::HSNBoard => xname_parent(xname).map(str::to_string),
            XnameKind::Other => None,
        };
        if partner.is_some_and(|p| in_round.contains(&p)) {
            rounds.push(std::mem::take(&mut current));
            in_round.clear();
        }
        in_round.insert(xname.clone());
        current.push(xname.clone());
    }
    if !current.is_empty() {
        rounds.push(current);
    }
    rounds
}
