//! src/services/precommit.rs
//!
//! The precommit constraint: the check-and-reconcile step a finalize or
//! delete flow runs inside its transaction right before it writes. It decides
//! which existing rows at a location must go (unversioned overwrite), refuses
//! when Object Lock or the caller forbids it, and reports the highest version
//! present so the caller can assign the next one.
//!
//! Everything runs on the caller's [`TransactionAdapter`]. The engine keeps no
//! state and takes no locks; two concurrent unversioned commits on the same
//! location are serialized by the backend transaction, and the loser gets the
//! backend's error unchanged.

use crate::{
    adapters::TransactionAdapter,
    errors::{MetabaseError, MetabaseResult},
    models::{Object, ObjectLocation, ObjectStatus, Version},
    services::metabase::Metabase,
};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Which existing rows an unversioned precommit may delete. Every mode runs
/// the retention check on all of its candidates first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PrecommitDeleteMode {
    /// Every committed object at the location.
    #[default]
    Default,
    /// Every committed object plus pending objects whose expiration passed.
    WithPendingSweep,
    /// Only the latest committed object, the one an unversioned write
    /// supersedes. Older committed versions are kept.
    WithObjectLockUnversioned,
}

pub const PRECOMMIT_DELETE_MODES: [PrecommitDeleteMode; 3] = [
    PrecommitDeleteMode::Default,
    PrecommitDeleteMode::WithPendingSweep,
    PrecommitDeleteMode::WithObjectLockUnversioned,
];

impl PrecommitDeleteMode {
    /// Pick deletion candidates out of every object at a location (ordered by
    /// version ascending). The result keeps that order.
    pub fn select(self, existing: Vec<Object>, now: DateTime<Utc>) -> Vec<Object> {
        match self {
            Self::Default => existing.into_iter().filter(Object::is_committed).collect(),
            Self::WithPendingSweep => existing
                .into_iter()
                .filter(|obj| match obj.status {
                    ObjectStatus::Committed => true,
                    ObjectStatus::Pending => obj.expires_at.is_some_and(|at| at <= now),
                })
                .collect(),
            Self::WithObjectLockUnversioned => existing
                .into_iter()
                .filter(Object::is_committed)
                .max_by_key(Object::version)
                .into_iter()
                .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrecommitConstraint {
    pub location: ObjectLocation,
    pub versioned: bool,
    pub disallow_delete: bool,
    pub mode: PrecommitDeleteMode,
}

impl PrecommitConstraint {
    /// Unversioned overwrite of `location` in the default mode.
    pub fn new(location: ObjectLocation) -> Self {
        Self {
            location,
            versioned: false,
            disallow_delete: false,
            mode: PrecommitDeleteMode::Default,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PrecommitConstraintResult {
    pub deleted: Vec<Object>,
    pub deleted_object_count: usize,
    pub deleted_segment_count: usize,
    /// Highest version at the location when the precommit ran; `0` if none.
    pub highest_version: Version,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PrecommitConstraintWithNonPendingResult {
    pub deleted: Vec<Object>,
    pub deleted_object_count: usize,
    pub deleted_segment_count: usize,
    pub highest_version: Version,
    /// Highest committed version when the precommit ran; `0` if none.
    pub highest_non_pending_version: Version,
}

struct Removed {
    objects: Vec<Object>,
    segment_count: usize,
}

impl TransactionAdapter {
    /// Reconcile `opts.location` ahead of a commit.
    ///
    /// Versioned commits delete nothing and only report the highest version.
    /// Unversioned commits delete the rows selected by `opts.mode`, unless
    /// one of them is under active Compliance retention (`ObjectLock`) or
    /// `opts.disallow_delete` is set (`Conflict`); either refusal leaves the
    /// location untouched.
    pub async fn precommit_constraint(
        &mut self,
        opts: PrecommitConstraint,
    ) -> MetabaseResult<PrecommitConstraintResult> {
        opts.location.verify()?;
        let loc = &opts.location;

        if opts.versioned {
            let highest_version = self.highest_version(loc).await?;
            debug!(location = %loc, highest_version, "versioned precommit");
            return Ok(PrecommitConstraintResult {
                highest_version,
                ..Default::default()
            });
        }

        let existing = self.objects_at(loc).await?;
        if existing.is_empty() {
            return Ok(PrecommitConstraintResult::default());
        }
        let highest_version = max_version(&existing);

        let candidates = opts.mode.select(existing, self.now());
        let removed = self
            .remove_candidates(loc, candidates, opts.disallow_delete)
            .await?;

        debug!(
            location = %loc,
            mode = ?opts.mode,
            deleted = removed.objects.len(),
            highest_version,
            "unversioned precommit"
        );

        Ok(PrecommitConstraintResult {
            deleted_object_count: removed.objects.len(),
            deleted_segment_count: removed.segment_count,
            deleted: removed.objects,
            highest_version,
        })
    }

    /// Retention-gated deletion of every committed object at `location`,
    /// regardless of versioning. Used by maintenance and bulk flows.
    pub async fn precommit_delete_unversioned_with_non_pending(
        &mut self,
        location: &ObjectLocation,
    ) -> MetabaseResult<PrecommitConstraintWithNonPendingResult> {
        location.verify()?;

        let existing = self.objects_at(location).await?;
        if existing.is_empty() {
            return Ok(PrecommitConstraintWithNonPendingResult::default());
        }
        let highest_version = max_version(&existing);

        let committed: Vec<Object> = existing.into_iter().filter(Object::is_committed).collect();
        let highest_non_pending_version = max_version(&committed);

        let removed = self.remove_candidates(location, committed, false).await?;
        debug!(
            location = %location,
            deleted = removed.objects.len(),
            highest_version,
            highest_non_pending_version,
            "non-pending precommit"
        );

        Ok(PrecommitConstraintWithNonPendingResult {
            deleted_object_count: removed.objects.len(),
            deleted_segment_count: removed.segment_count,
            deleted: removed.objects,
            highest_version,
            highest_non_pending_version,
        })
    }

    /// Check every candidate, then delete them all. Nothing is written unless
    /// every check passes.
    async fn remove_candidates(
        &mut self,
        loc: &ObjectLocation,
        candidates: Vec<Object>,
        disallow_delete: bool,
    ) -> MetabaseResult<Removed> {
        let now = self.now();
        if let Some(locked) = candidates.iter().find(|obj| obj.retention.is_protected(now)) {
            warn!(
                location = %loc,
                version = locked.version(),
                retain_until = ?locked.retention.retain_until,
                "precommit blocked by object lock"
            );
            return Err(MetabaseError::ObjectLock(format!(
                "object {} version {} is under compliance retention",
                loc,
                locked.version()
            )));
        }

        if candidates.is_empty() {
            return Ok(Removed {
                objects: Vec::new(),
                segment_count: 0,
            });
        }

        if disallow_delete {
            warn!(location = %loc, candidates = candidates.len(), "precommit would overwrite, delete disallowed");
            return Err(MetabaseError::Conflict(format!(
                "object {} already exists and may not be overwritten",
                loc
            )));
        }

        // Pending uploads carry segments before their count is recorded, so
        // report the rows removed rather than `segment_count`.
        let mut segment_count = 0;
        for obj in &candidates {
            let removed = self.delete_object_with_segments(obj).await?;
            debug!(
                location = %loc,
                version = obj.version(),
                status = ?obj.status,
                segments = removed,
                "removed object"
            );
            segment_count += removed as usize;
        }

        Ok(Removed {
            objects: candidates,
            segment_count,
        })
    }
}

impl Metabase {
    /// Run [`TransactionAdapter::precommit_constraint`] after checking that
    /// `tx` belongs to the shard owning the location's project.
    pub async fn precommit_constraint(
        &self,
        opts: PrecommitConstraint,
        tx: &mut TransactionAdapter,
    ) -> MetabaseResult<PrecommitConstraintResult> {
        opts.location.verify()?;
        let owner = self.choose_adapter(opts.location.project_id).name();
        if tx.shard() != owner {
            return Err(MetabaseError::invalid(format!(
                "transaction on shard `{}` cannot reconcile project {} owned by shard `{}`",
                tx.shard(),
                opts.location.project_id,
                owner
            )));
        }
        tx.precommit_constraint(opts).await
    }
}

fn max_version(objects: &[Object]) -> Version {
    objects.iter().map(Object::version).max().unwrap_or(0)
}
