use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::Error;
use crate::normalize;

const REVIEW_DIR: &str = "duplicates";

/// One group of images judged to depict the same photo.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    /// The path whose duplicate list seeded the cluster.
    pub representative: PathBuf,
    /// The member chosen for output.
    pub canonical: PathBuf,
    /// Every member with its distance to the representative. The
    /// representative itself is the leading distance-0 entry.
    pub members: Vec<(u32, PathBuf)>,
}

/// Counts for the end-of-run summary.
#[derive(Debug, Default)]
pub struct PlanSummary {
    pub kept: usize,
    pub duplicate_clusters: usize,
    pub reviewed: usize,
}

/// Oldest known timestamp for a file: the min of creation and modification
/// time, which stays stable across copies that reset one but preserve the
/// other.
pub fn file_date(path: &Path) -> SystemTime {
    let Ok(meta) = fs::metadata(path) else {
        return SystemTime::UNIX_EPOCH;
    };
    match (meta.created(), meta.modified()) {
        (Ok(created), Ok(modified)) => created.min(modified),
        (Ok(created), Err(_)) => created,
        (Err(_), Ok(modified)) => modified,
        (Err(_), Err(_)) => SystemTime::UNIX_EPOCH,
    }
}

/// Greedy single-pass clustering.
///
/// Candidates are walked oldest first; each one claims itself and every
/// member of its duplicate list, so a path lands in at most one cluster and
/// the oldest sighting wins. A pure function of the duplicate record and the
/// two lookups, with no shared state beyond the local claimed set.
pub fn plan_clusters(
    duplicates: &BTreeMap<PathBuf, Vec<(u32, PathBuf)>>,
    file_date: impl Fn(&Path) -> SystemTime,
    dimensions: impl Fn(&Path) -> Option<(u32, u32)>,
) -> Vec<Cluster> {
    let mut order: Vec<&PathBuf> = duplicates.keys().collect();
    order.sort_by_key(|path| file_date(path));

    let mut claimed: HashSet<PathBuf> = HashSet::new();
    let mut clusters = Vec::new();
    for path in order {
        if claimed.contains(path) {
            continue;
        }
        let mut members = vec![(0u32, path.clone())];
        if let Some(found) = duplicates.get(path) {
            // A member already claimed by an older cluster stays there.
            members.extend(
                found
                    .iter()
                    .filter(|(_, member)| !claimed.contains(member))
                    .cloned(),
            );
        }
        claimed.extend(members.iter().map(|(_, member)| member.clone()));
        let canonical = best_match(&members, &dimensions);
        clusters.push(Cluster {
            representative: path.clone(),
            canonical,
            members,
        });
    }
    clusters
}

/// Picks the member whose dimensions strictly dominate the best so far in
/// both width and height; ties or crossed dominance keep the earlier member.
fn best_match(
    members: &[(u32, PathBuf)],
    dimensions: &impl Fn(&Path) -> Option<(u32, u32)>,
) -> PathBuf {
    if members.len() == 1 {
        return members[0].1.clone();
    }
    let mut best = None;
    let mut best_size = (0, 0);
    for (_, path) in members {
        let Some((width, height)) = dimensions(path) else {
            continue;
        };
        if width > best_size.0 && height > best_size.1 {
            best = Some(path.clone());
            best_size = (width, height);
        }
    }
    best.unwrap_or_else(|| members[0].1.clone())
}

fn lower_extension(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .unwrap_or_default()
}

/// Numbered destination name, e.g. `IMG_00012.jpg`.
fn numbered_name(source: &Path, number: usize) -> String {
    format!("IMG_{:05}{}", number, lower_extension(source))
}

/// Copies each cluster's canonical image to its numbered destination slot
/// and routes questionable matches to a per-cluster review folder.
///
/// Only members at distance > 0 need human eyes; exact byte-identical
/// duplicates are consolidated silently. When a review folder is created the
/// canonical image is copied alongside as `kept.<ext>` for comparison.
pub fn execute_plan(clusters: &[Cluster], dest: &Path) -> Result<PlanSummary, Error> {
    let mut summary = PlanSummary::default();
    let review_root = dest.join(REVIEW_DIR);
    let mut review_slot = 0usize;

    for (index, cluster) in clusters.iter().enumerate() {
        let target = dest.join(numbered_name(&cluster.canonical, index + 1));
        log::info!("copying {} to {}", cluster.canonical.display(), target.display());
        fs::copy(&cluster.canonical, &target)?;
        normalize::copy_file_times(&cluster.canonical, &target);
        summary.kept += 1;

        if cluster.members.len() <= 1 {
            continue;
        }
        summary.duplicate_clusters += 1;
        review_slot += 1;
        let review_dir = review_root.join(review_slot.to_string());
        let mut created = false;
        let canonical_distance = cluster
            .members
            .iter()
            .find(|(_, member)| member == &cluster.canonical)
            .map_or(0, |(distance, _)| *distance);
        for (member_index, (distance, member)) in cluster.members.iter().enumerate() {
            if member == &cluster.canonical {
                continue;
            }
            // The representative's recorded distance is to itself. Once a
            // different member is kept, it sits the canonical's distance
            // from the output and needs review like any other member.
            let distance = if member == &cluster.representative {
                canonical_distance
            } else {
                *distance
            };
            if distance == 0 {
                continue;
            }
            if !created {
                fs::create_dir_all(&review_dir)?;
                created = true;
            }
            let name = format!("{}_{}{}", distance, member_index + 1, lower_extension(member));
            let copied = review_dir.join(name);
            fs::copy(member, &copied)?;
            normalize::copy_file_times(member, &copied);
            summary.reviewed += 1;
        }
        if created {
            let kept = format!("kept{}", lower_extension(&cluster.canonical));
            fs::copy(&target, review_dir.join(kept))?;
        }
    }
    Ok(summary)
}
