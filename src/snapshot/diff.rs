//! Identity-based diffs between orderings and between snapshots.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;

use super::section::{SectionKey, Snapshot};

/// Position of an item inside a sectioned snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemPath {
    pub section: usize,
    pub item: usize,
}

impl ItemPath {
    pub fn new(section: usize, item: usize) -> Self {
        Self { section, item }
    }
}

/// Changes between two orderings of the same query.
///
/// Apply in order: remove `deletions` and move sources (old indices), then
/// place `insertions` and move targets (new indices) ascending, then refresh
/// `modifications` (new indices).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultChanges {
    pub deletions: Vec<usize>,
    pub insertions: Vec<usize>,
    pub modifications: Vec<usize>,
    /// `(old index, new index)` of items that changed relative order.
    pub moves: Vec<(usize, usize)>,
}

impl ResultChanges {
    /// Diff two orderings. `modified` tells which surviving items changed
    /// value.
    pub fn compute<I, F>(old: &[I], new: &[I], modified: F) -> Self
    where
        I: Copy + Eq + Hash,
        F: Fn(&I) -> bool,
    {
        let old_pos: HashMap<I, usize> = old.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let new_pos: HashMap<I, usize> = new.iter().enumerate().map(|(j, id)| (*id, j)).collect();

        let deletions = (0..old.len())
            .filter(|i| !new_pos.contains_key(&old[*i]))
            .collect();

        let mut insertions = Vec::new();
        let mut common = Vec::new();
        for (j, id) in new.iter().enumerate() {
            match old_pos.get(id) {
                Some(&i) => common.push(Common {
                    old: i,
                    new: j,
                    modified: modified(id),
                }),
                None => insertions.push(j),
            }
        }

        let moved = find_moves(&common);
        let moves = common
            .iter()
            .zip(&moved)
            .filter(|(_, moved)| **moved)
            .map(|(c, _)| (c.old, c.new))
            .collect();
        let modifications = common.iter().filter(|c| c.modified).map(|c| c.new).collect();

        Self {
            deletions,
            insertions,
            modifications,
            moves,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty()
            && self.insertions.is_empty()
            && self.modifications.is_empty()
            && self.moves.is_empty()
    }

    /// Replay these changes on `old`, taking inserted and moved items from
    /// `new`. Yields `new` when the changes were computed from this pair.
    pub fn apply<T: Clone>(&self, old: &[T], new: &[T]) -> Vec<T> {
        let mut removed = vec![false; old.len()];
        for &i in &self.deletions {
            removed[i] = true;
        }
        for &(from, _) in &self.moves {
            removed[from] = true;
        }

        let mut result: Vec<T> = old
            .iter()
            .zip(&removed)
            .filter(|(_, gone)| !**gone)
            .map(|(item, _)| item.clone())
            .collect();

        let mut placed: Vec<usize> = self
            .insertions
            .iter()
            .copied()
            .chain(self.moves.iter().map(|&(_, to)| to))
            .collect();
        placed.sort_unstable();
        for j in placed {
            result.insert(j, new[j].clone());
        }
        result
    }
}

/// Changes between two sectioned snapshots.
///
/// Items inside an inserted or deleted section are covered by the section
/// change and not listed individually. An item that changes section is a
/// deletion from its old section plus an insertion into its new one.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotChanges {
    /// Old section indices.
    pub deleted_sections: Vec<usize>,
    /// New section indices.
    pub inserted_sections: Vec<usize>,
    /// `(old index, new index)` of sections that changed relative order.
    pub moved_sections: Vec<(usize, usize)>,
    /// Old paths.
    pub deletions: Vec<ItemPath>,
    /// New paths.
    pub insertions: Vec<ItemPath>,
    /// New paths.
    pub modifications: Vec<ItemPath>,
    /// `(old path, new path)` of items that changed order within a section.
    pub moves: Vec<(ItemPath, ItemPath)>,
}

impl SnapshotChanges {
    pub fn compute<I, F>(old: &Snapshot<I>, new: &Snapshot<I>, modified: F) -> Self
    where
        I: Copy + Eq + Hash,
        F: Fn(&I) -> bool,
    {
        let mut changes = SnapshotChanges::default();

        let old_sections: HashMap<&SectionKey, usize> = old
            .sections
            .iter()
            .enumerate()
            .map(|(s, section)| (&section.key, s))
            .collect();
        let new_sections: HashMap<&SectionKey, usize> = new
            .sections
            .iter()
            .enumerate()
            .map(|(s, section)| (&section.key, s))
            .collect();

        changes.deleted_sections = (0..old.sections.len())
            .filter(|s| !new_sections.contains_key(&old.sections[*s].key))
            .collect();

        let mut common_sections = Vec::new();
        for (s, section) in new.sections.iter().enumerate() {
            match old_sections.get(&section.key) {
                Some(&old_s) => common_sections.push(Common {
                    old: old_s,
                    new: s,
                    modified: false,
                }),
                None => changes.inserted_sections.push(s),
            }
        }
        let moved = find_moves(&common_sections);
        changes.moved_sections = common_sections
            .iter()
            .zip(&moved)
            .filter(|(_, moved)| **moved)
            .map(|(c, _)| (c.old, c.new))
            .collect();

        let old_paths = index_paths(old);
        let new_paths = index_paths(new);

        // Deletions, in old path order.
        for (s, section) in old.sections.iter().enumerate() {
            let Some(&new_s) = new_sections.get(&section.key) else {
                continue;
            };
            for (i, id) in section.items.iter().enumerate() {
                let stays = matches!(new_paths.get(id), Some(path) if path.section == new_s);
                if !stays {
                    changes.deletions.push(ItemPath::new(s, i));
                }
            }
        }

        // Insertions, moves and modifications, in new path order.
        for (s, section) in new.sections.iter().enumerate() {
            let Some(&old_s) = old_sections.get(&section.key) else {
                continue;
            };
            let mut common = Vec::new();
            for (j, id) in section.items.iter().enumerate() {
                match old_paths.get(id) {
                    Some(path) if path.section == old_s => common.push(Common {
                        old: path.item,
                        new: j,
                        modified: modified(id),
                    }),
                    _ => changes.insertions.push(ItemPath::new(s, j)),
                }
            }

            let moved = find_moves(&common);
            for (c, moved) in common.iter().zip(&moved) {
                if *moved {
                    changes
                        .moves
                        .push((ItemPath::new(old_s, c.old), ItemPath::new(s, c.new)));
                }
                if c.modified {
                    changes.modifications.push(ItemPath::new(s, c.new));
                }
            }
        }

        changes
    }

    pub fn is_empty(&self) -> bool {
        self.deleted_sections.is_empty()
            && self.inserted_sections.is_empty()
            && self.moved_sections.is_empty()
            && self.deletions.is_empty()
            && self.insertions.is_empty()
            && self.modifications.is_empty()
            && self.moves.is_empty()
    }
}

fn index_paths<I: Copy + Eq + Hash>(snapshot: &Snapshot<I>) -> HashMap<I, ItemPath> {
    let mut paths = HashMap::with_capacity(snapshot.len());
    for (s, section) in snapshot.sections.iter().enumerate() {
        for (i, id) in section.items.iter().enumerate() {
            paths.insert(*id, ItemPath::new(s, i));
        }
    }
    paths
}

/// An item present on both sides.
struct Common {
    old: usize,
    new: usize,
    modified: bool,
}

/// Decide which common items (given in new order) moved.
///
/// Unmodified items on a longest increasing run of old positions stay put.
/// Modified items are then kept only where they still fit between their
/// stable neighbours, so a changed item is reported as the mover rather
/// than an untouched one beside it.
fn find_moves(common: &[Common]) -> Vec<bool> {
    let n = common.len();
    let mut stable = vec![false; n];

    let unmodified: Vec<usize> = (0..n).filter(|&k| !common[k].modified).collect();
    let positions: Vec<usize> = unmodified.iter().map(|&k| common[k].old).collect();
    for idx in longest_increasing(&positions) {
        stable[unmodified[idx]] = true;
    }

    // Old position of the nearest stable item on each side.
    let mut prev_old = vec![None; n];
    let mut last = None;
    for k in 0..n {
        prev_old[k] = last;
        if stable[k] {
            last = Some(common[k].old);
        }
    }
    let mut next_old = vec![None; n];
    let mut last = None;
    for k in (0..n).rev() {
        next_old[k] = last;
        if stable[k] {
            last = Some(common[k].old);
        }
    }

    // Modified items that fit their gap, grouped by gap, in new order.
    let mut gaps: HashMap<Option<usize>, Vec<usize>> = HashMap::new();
    for k in 0..n {
        if !common[k].modified {
            continue;
        }
        let old = common[k].old;
        let fits_prev = prev_old[k].map_or(true, |p| p < old);
        let fits_next = next_old[k].map_or(true, |nx| old < nx);
        if fits_prev && fits_next {
            gaps.entry(prev_old[k]).or_default().push(k);
        }
    }
    for members in gaps.values() {
        let positions: Vec<usize> = members.iter().map(|&k| common[k].old).collect();
        for idx in longest_increasing(&positions) {
            stable[members[idx]] = true;
        }
    }

    stable.into_iter().map(|s| !s).collect()
}

/// Indices into `seq` of one longest strictly increasing subsequence.
fn longest_increasing(seq: &[usize]) -> Vec<usize> {
    // tails[l] = index in seq of the smallest tail of an increasing run of length l + 1
    let mut tails: Vec<usize> = Vec::new();
    let mut parent: Vec<Option<usize>> = vec![None; seq.len()];

    for (i, &value) in seq.iter().enumerate() {
        let l = tails.partition_point(|&t| seq[t] < value);
        if l > 0 {
            parent[i] = Some(tails[l - 1]);
        }
        if l == tails.len() {
            tails.push(i);
        } else {
            tails[l] = i;
        }
    }

    let mut run = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        run.push(i);
        cursor = parent[i];
    }
    run.reverse();
    run
}
