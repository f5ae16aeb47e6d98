//! In-memory persister: revision lists per (workspace, cube name) behind
//! one mutex, the way the SQL store keys its rows. Negative revision
//! numbers are tombstones; the newest revision of a name is current.

use super::cube::{CubeState, GridCube};
use chrono::{DateTime, Utc};
use cubevault::{
    ApplicationId, CubeInfo, Cube, Persister, ReleaseStatus, RepoError, RepoResult, SearchOptions,
    SYS_VERSION,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct Revision {
    id: i64,
    revision: i64,
    sha1: String,
    head_sha1: Option<String>,
    changed: bool,
    notes: Option<String>,
    test_data: Option<String>,
    created_at: DateTime<Utc>,
    created_by: String,
    state: CubeState,
}

type Space = HashMap<String, Vec<Revision>>;

pub struct InMemoryPersister {
    spaces: Mutex<HashMap<ApplicationId, Space>>,
    next_id: AtomicI64,
    load_calls: AtomicI64,
}

impl InMemoryPersister {
    pub fn new() -> Self {
        Self {
            spaces: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            load_calls: AtomicI64::new(0),
        }
    }

    /// How often `load_cube` hit the store. Lets tests prove the cache
    /// absorbed repeated lookups.
    pub fn load_call_count(&self) -> i64 {
        self.load_calls.load(Ordering::SeqCst)
    }

    /// Number of revisions stored anywhere. Lets tests prove an operation
    /// never reached the store.
    pub fn revision_count(&self) -> usize {
        self.spaces
            .lock()
            .values()
            .flat_map(|space| space.values())
            .map(|revs| revs.len())
            .sum()
    }

    fn id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn snapshot(cube: &dyn Cube) -> RepoResult<CubeState> {
        cube.as_any()
            .downcast_ref::<GridCube>()
            .map(GridCube::snapshot)
            .ok_or_else(|| RepoError::Persistence("Unsupported cube implementation".to_string()))
    }

    fn revision_of(
        &self,
        prev: Option<&Revision>,
        sha1: String,
        head_sha1: Option<String>,
        changed: bool,
        user: &str,
        state: CubeState,
        tombstone: bool,
    ) -> Revision {
        let number = match prev {
            Some(p) => p.revision.abs() + 1,
            None => 0,
        };
        Revision {
            id: self.id(),
            revision: if tombstone { -number.max(1) } else { number },
            sha1,
            head_sha1,
            changed,
            notes: None,
            test_data: None,
            created_at: Utc::now(),
            created_by: user.to_string(),
            state,
        }
    }
}

fn current(revs: &[Revision]) -> Option<&Revision> {
    revs.last()
}

fn info(rev: &Revision, app_id: &ApplicationId, options: &SearchOptions) -> CubeInfo {
    CubeInfo {
        id: rev.id,
        name: rev.state.name.clone(),
        app_id: app_id.clone(),
        revision: rev.revision,
        sha1: rev.sha1.clone(),
        head_sha1: rev.head_sha1.clone(),
        changed: rev.changed,
        notes: options.include_notes.then(|| rev.notes.clone()).flatten(),
        test_data: options
            .include_test_data
            .then(|| rev.test_data.clone())
            .flatten(),
        created_at: rev.created_at,
        created_by: rev.created_by.clone(),
        change_type: None,
    }
}

fn name_matches(pattern: Option<&str>, name: &str, exact: bool) -> bool {
    let pattern = match pattern {
        Some(p) if !p.is_empty() => p,
        _ => return true,
    };
    if exact {
        return pattern.eq_ignore_ascii_case(name);
    }
    if cubevault::patterns::is_glob(pattern) {
        return cubevault::patterns::matches(pattern, name);
    }
    name.to_lowercase().contains(&pattern.to_lowercase())
}

fn content_matches(pattern: Option<&str>, state: &CubeState) -> bool {
    let pattern = match pattern {
        Some(p) if !p.is_empty() => p,
        _ => return true,
    };
    let haystack = state
        .cells
        .values()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("\n")
        .to_lowercase();
    haystack.contains(&pattern.to_lowercase())
}

impl Persister for InMemoryPersister {
    fn load_cube(&self, app_id: &ApplicationId, name: &str) -> RepoResult<Option<Arc<dyn Cube>>> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        let spaces = self.spaces.lock();
        let rev = spaces
            .get(app_id)
            .and_then(|space| space.get(&name.to_lowercase()))
            .and_then(|revs| current(revs));
        match rev {
            Some(rev) if rev.revision >= 0 => {
                Ok(Some(GridCube::from_state(app_id, rev.state.clone())))
            }
            _ => Ok(None),
        }
    }

    fn load_cube_by_id(&self, id: i64) -> RepoResult<Arc<dyn Cube>> {
        let spaces = self.spaces.lock();
        for (app_id, space) in spaces.iter() {
            for revs in space.values() {
                if let Some(rev) = revs.iter().find(|r| r.id == id) {
                    return Ok(GridCube::from_state(app_id, rev.state.clone()));
                }
            }
        }
        Err(RepoError::Persistence(format!("No revision with id {}", id)))
    }

    fn load_cube_by_sha1(
        &self,
        app_id: &ApplicationId,
        name: &str,
        sha1: &str,
    ) -> RepoResult<Arc<dyn Cube>> {
        let spaces = self.spaces.lock();
        let revs = spaces
            .get(app_id)
            .and_then(|space| space.get(&name.to_lowercase()))
            .ok_or_else(|| RepoError::CubeNotFound {
                app_id: app_id.to_string(),
                name: name.to_string(),
            })?;
        revs.iter()
            .rev()
            .find(|r| r.sha1 == sha1)
            .map(|rev| GridCube::from_state(app_id, rev.state.clone()) as Arc<dyn Cube>)
            .ok_or_else(|| {
                RepoError::Persistence(format!("No revision of '{}' with sha1 {}", name, sha1))
            })
    }

    fn search(
        &self,
        app_id: &ApplicationId,
        name_pattern: Option<&str>,
        content_pattern: Option<&str>,
        options: &SearchOptions,
    ) -> RepoResult<Vec<CubeInfo>> {
        let spaces = self.spaces.lock();
        let space = match spaces.get(app_id) {
            Some(space) => space,
            None => return Ok(Vec::new()),
        };
        let mut results = Vec::new();
        for revs in space.values() {
            let rev = match current(revs) {
                Some(rev) => rev,
                None => continue,
            };
            if options.active_records_only && rev.revision < 0 {
                continue;
            }
            if options.deleted_records_only && rev.revision >= 0 {
                continue;
            }
            if options.changed_records_only && !rev.changed {
                continue;
            }
            if !name_matches(name_pattern, &rev.state.name, options.exact_match_name) {
                continue;
            }
            if !content_matches(content_pattern, &rev.state) {
                continue;
            }
            results.push(info(rev, app_id, options));
        }
        results.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(results)
    }

    fn get_revisions(&self, app_id: &ApplicationId, name: &str) -> RepoResult<Vec<CubeInfo>> {
        let spaces = self.spaces.lock();
        let revs = spaces
            .get(app_id)
            .and_then(|space| space.get(&name.to_lowercase()))
            .ok_or_else(|| RepoError::CubeNotFound {
                app_id: app_id.to_string(),
                name: name.to_string(),
            })?;
        let options = SearchOptions {
            include_notes: true,
            include_test_data: true,
            ..SearchOptions::default()
        };
        Ok(revs.iter().rev().map(|r| info(r, app_id, &options)).collect())
    }

    fn update_cube(&self, app_id: &ApplicationId, cube: &dyn Cube, user: &str) -> RepoResult<()> {
        let state = Self::snapshot(cube)?;
        let sha1 = cube.sha1();
        let mut spaces = self.spaces.lock();
        let space = spaces.entry(app_id.clone()).or_default();
        let revs = space.entry(state.name.to_lowercase()).or_default();

        if let Some(last) = current(revs) {
            if last.revision >= 0 && last.sha1 == sha1 {
                // Unchanged content: no new revision.
                return Ok(());
            }
        }
        let changed = !app_id.is_head();
        let head_sha1 = current(revs).and_then(|r| r.head_sha1.clone());
        let rev = self.revision_of(current(revs), sha1, head_sha1, changed, user, state, false);
        revs.push(rev);
        Ok(())
    }

    fn duplicate_cube(
        &self,
        old_id: &ApplicationId,
        new_id: &ApplicationId,
        old_name: &str,
        new_name: &str,
        user: &str,
    ) -> RepoResult<()> {
        let mut spaces = self.spaces.lock();
        let source = spaces
            .get(old_id)
            .and_then(|space| space.get(&old_name.to_lowercase()))
            .and_then(|revs| current(revs))
            .filter(|rev| rev.revision >= 0)
            .cloned()
            .ok_or_else(|| RepoError::CubeNotFound {
                app_id: old_id.to_string(),
                name: old_name.to_string(),
            })?;

        let mut state = source.state.clone();
        state.name = new_name.to_string();
        let cube = GridCube::from_state(new_id, state.clone());
        let sha1 = cube.sha1();

        let space = spaces.entry(new_id.clone()).or_default();
        let revs = space.entry(new_name.to_lowercase()).or_default();
        let changed = !new_id.is_head();
        let rev = self.revision_of(current(revs), sha1, None, changed, user, state, false);
        revs.push(rev);
        Ok(())
    }

    fn rename_cube(
        &self,
        app_id: &ApplicationId,
        old_name: &str,
        new_name: &str,
        user: &str,
    ) -> RepoResult<()> {
        let mut spaces = self.spaces.lock();
        let space = spaces
            .get_mut(app_id)
            .ok_or_else(|| RepoError::CubeNotFound {
                app_id: app_id.to_string(),
                name: old_name.to_string(),
            })?;
        let source = space
            .get(&old_name.to_lowercase())
            .and_then(|revs| current(revs))
            .filter(|rev| rev.revision >= 0)
            .cloned()
            .ok_or_else(|| RepoError::CubeNotFound {
                app_id: app_id.to_string(),
                name: old_name.to_string(),
            })?;

        let changed = !app_id.is_head();

        // Tombstone the old name.
        let old_revs = space.entry(old_name.to_lowercase()).or_default();
        let tomb = self.revision_of(
            current(old_revs),
            source.sha1.clone(),
            source.head_sha1.clone(),
            changed,
            user,
            source.state.clone(),
            true,
        );
        old_revs.push(tomb);

        // New revision under the new name.
        let mut state = source.state;
        state.name = new_name.to_string();
        let new_revs = space.entry(new_name.to_lowercase()).or_default();
        let rev = self.revision_of(
            current(new_revs),
            source.sha1,
            None,
            changed,
            user,
            state,
            false,
        );
        new_revs.push(rev);
        Ok(())
    }

    fn delete_cubes(
        &self,
        app_id: &ApplicationId,
        names: &[String],
        _allow_hard: bool,
        user: &str,
    ) -> RepoResult<()> {
        let mut spaces = self.spaces.lock();
        let space = spaces
            .get_mut(app_id)
            .ok_or_else(|| RepoError::CubeNotFound {
                app_id: app_id.to_string(),
                name: names.join(","),
            })?;
        let changed = !app_id.is_head();
        for name in names {
            let revs = space
                .get_mut(&name.to_lowercase())
                .ok_or_else(|| RepoError::CubeNotFound {
                    app_id: app_id.to_string(),
                    name: name.clone(),
                })?;
            let last = current(revs)
                .filter(|rev| rev.revision >= 0)
                .cloned()
                .ok_or_else(|| RepoError::CubeNotFound {
                    app_id: app_id.to_string(),
                    name: name.clone(),
                })?;
            let tomb = self.revision_of(
                Some(&last),
                last.sha1.clone(),
                last.head_sha1.clone(),
                changed,
                user,
                last.state.clone(),
                true,
            );
            revs.push(tomb);
        }
        Ok(())
    }

    fn restore_cubes(
        &self,
        app_id: &ApplicationId,
        names: &[String],
        user: &str,
    ) -> RepoResult<()> {
        let mut spaces = self.spaces.lock();
        let space = spaces
            .get_mut(app_id)
            .ok_or_else(|| RepoError::CubeNotFound {
                app_id: app_id.to_string(),
                name: names.join(","),
            })?;
        for name in names {
            let revs = space
                .get_mut(&name.to_lowercase())
                .ok_or_else(|| RepoError::CubeNotFound {
                    app_id: app_id.to_string(),
                    name: name.clone(),
                })?;
            let last = current(revs).cloned().ok_or_else(|| RepoError::CubeNotFound {
                app_id: app_id.to_string(),
                name: name.clone(),
            })?;
            if last.revision >= 0 {
                return Err(RepoError::InvalidInput(format!(
                    "Cube '{}' is not deleted",
                    name
                )));
            }
            let rev = self.revision_of(
                Some(&last),
                last.sha1.clone(),
                last.head_sha1.clone(),
                true,
                user,
                last.state.clone(),
                false,
            );
            revs.push(rev);
        }
        Ok(())
    }

    fn rollback_cubes(
        &self,
        app_id: &ApplicationId,
        names: &[String],
        user: &str,
    ) -> RepoResult<()> {
        let head = app_id.as_head();
        let mut spaces = self.spaces.lock();

        for name in names {
            let base = spaces
                .get(app_id)
                .and_then(|space| space.get(&name.to_lowercase()))
                .and_then(|revs| current(revs))
                .and_then(|rev| rev.head_sha1.clone());

            let base_state = match &base {
                Some(sha1) => spaces
                    .get(&head)
                    .and_then(|space| space.get(&name.to_lowercase()))
                    .and_then(|revs| revs.iter().rev().find(|r| r.sha1 == *sha1))
                    .map(|rev| (rev.sha1.clone(), rev.state.clone(), rev.revision < 0)),
                None => None,
            };

            let space = spaces
                .get_mut(app_id)
                .ok_or_else(|| RepoError::CubeNotFound {
                    app_id: app_id.to_string(),
                    name: name.clone(),
                })?;
            let revs = space
                .get_mut(&name.to_lowercase())
                .ok_or_else(|| RepoError::CubeNotFound {
                    app_id: app_id.to_string(),
                    name: name.clone(),
                })?;
            let last = current(revs).cloned();

            match base_state {
                Some((sha1, state, tombstone)) => {
                    let rev = self.revision_of(
                        last.as_ref(),
                        sha1.clone(),
                        Some(sha1),
                        false,
                        user,
                        state,
                        tombstone,
                    );
                    revs.push(rev);
                }
                None => {
                    // Never committed: rolling back removes the cube.
                    if let Some(last) = last {
                        let tomb = self.revision_of(
                            Some(&last),
                            last.sha1.clone(),
                            None,
                            false,
                            user,
                            last.state.clone(),
                            true,
                        );
                        revs.push(tomb);
                    }
                }
            }
        }
        Ok(())
    }

    fn commit_cubes(
        &self,
        app_id: &ApplicationId,
        ids: &[i64],
        user: &str,
    ) -> RepoResult<Vec<CubeInfo>> {
        let head = app_id.as_head();
        let mut spaces = self.spaces.lock();
        let mut committed = Vec::new();

        for id in ids {
            let branch_rev = spaces
                .get(app_id)
                .and_then(|space| {
                    space
                        .values()
                        .find_map(|revs| revs.iter().find(|r| r.id == *id))
                })
                .cloned()
                .ok_or_else(|| {
                    RepoError::Persistence(format!("No branch revision with id {}", id))
                })?;

            let key = branch_rev.state.name.to_lowercase();
            let head_space = spaces.entry(head.clone()).or_default();
            let head_revs = head_space.entry(key.clone()).or_default();
            let rev = self.revision_of(
                current(head_revs),
                branch_rev.sha1.clone(),
                None,
                false,
                user,
                branch_rev.state.clone(),
                branch_rev.revision < 0,
            );
            committed.push(info(&rev, &head, &SearchOptions::default()));
            head_revs.push(rev);

            // The branch copy is now in sync with head.
            if let Some(space) = spaces.get_mut(app_id) {
                if let Some(revs) = space.get_mut(&key) {
                    if let Some(last) = revs.last_mut() {
                        last.head_sha1 = Some(branch_rev.sha1.clone());
                        last.changed = false;
                    }
                }
            }
        }
        Ok(committed)
    }

    fn commit_merged_cube_to_head(
        &self,
        app_id: &ApplicationId,
        cube: &dyn Cube,
        user: &str,
    ) -> RepoResult<CubeInfo> {
        let state = Self::snapshot(cube)?;
        let sha1 = cube.sha1();
        let head = app_id.as_head();
        let key = state.name.to_lowercase();
        let mut spaces = self.spaces.lock();

        let head_space = spaces.entry(head.clone()).or_default();
        let head_revs = head_space.entry(key.clone()).or_default();
        let rev = self.revision_of(
            current(head_revs),
            sha1.clone(),
            None,
            false,
            user,
            state.clone(),
            false,
        );
        let result = info(&rev, &head, &SearchOptions::default());
        head_revs.push(rev);

        // The branch converges on the merged content.
        let space = spaces.entry(app_id.clone()).or_default();
        let revs = space.entry(key).or_default();
        let branch_rev = self.revision_of(
            current(revs),
            sha1.clone(),
            Some(sha1),
            false,
            user,
            state,
            false,
        );
        revs.push(branch_rev);
        Ok(result)
    }

    fn commit_merged_cube_to_branch(
        &self,
        app_id: &ApplicationId,
        cube: &dyn Cube,
        base_sha1: Option<&str>,
        user: &str,
    ) -> RepoResult<CubeInfo> {
        let state = Self::snapshot(cube)?;
        let sha1 = cube.sha1();
        let key = state.name.to_lowercase();
        let mut spaces = self.spaces.lock();
        let space = spaces.entry(app_id.clone()).or_default();
        let revs = space.entry(key).or_default();
        let rev = self.revision_of(
            current(revs),
            sha1,
            base_sha1.map(String::from),
            true,
            user,
            state,
            false,
        );
        let result = info(&rev, app_id, &SearchOptions::default());
        revs.push(rev);
        Ok(result)
    }

    fn pull_to_branch(
        &self,
        app_id: &ApplicationId,
        ids: &[i64],
        user: &str,
    ) -> RepoResult<Vec<CubeInfo>> {
        let mut spaces = self.spaces.lock();
        let mut pulled = Vec::new();

        for id in ids {
            let source = spaces
                .values()
                .find_map(|space| {
                    space
                        .values()
                        .find_map(|revs| revs.iter().find(|r| r.id == *id))
                })
                .cloned()
                .ok_or_else(|| RepoError::Persistence(format!("No revision with id {}", id)))?;

            let space = spaces.entry(app_id.clone()).or_default();
            let revs = space.entry(source.state.name.to_lowercase()).or_default();
            let rev = self.revision_of(
                current(revs),
                source.sha1.clone(),
                Some(source.sha1.clone()),
                false,
                user,
                source.state.clone(),
                source.revision < 0,
            );
            pulled.push(info(&rev, app_id, &SearchOptions::default()));
            revs.push(rev);
        }
        Ok(pulled)
    }

    fn update_branch_cube_head_sha1(&self, id: i64, head_sha1: &str) -> RepoResult<()> {
        let mut spaces = self.spaces.lock();
        for space in spaces.values_mut() {
            for revs in space.values_mut() {
                if let Some(rev) = revs.iter_mut().find(|r| r.id == id) {
                    rev.head_sha1 = Some(head_sha1.to_string());
                    return Ok(());
                }
            }
        }
        Err(RepoError::Persistence(format!("No revision with id {}", id)))
    }

    fn merge_accept_mine(
        &self,
        app_id: &ApplicationId,
        name: &str,
        _user: &str,
    ) -> RepoResult<CubeInfo> {
        let head = app_id.as_head();
        let mut spaces = self.spaces.lock();
        let head_sha1 = spaces
            .get(&head)
            .and_then(|space| space.get(&name.to_lowercase()))
            .and_then(|revs| current(revs))
            .map(|rev| rev.sha1.clone());

        let space = spaces
            .get_mut(app_id)
            .ok_or_else(|| RepoError::CubeNotFound {
                app_id: app_id.to_string(),
                name: name.to_string(),
            })?;
        let revs = space
            .get_mut(&name.to_lowercase())
            .ok_or_else(|| RepoError::CubeNotFound {
                app_id: app_id.to_string(),
                name: name.to_string(),
            })?;
        let last = revs.last_mut().ok_or_else(|| RepoError::CubeNotFound {
            app_id: app_id.to_string(),
            name: name.to_string(),
        })?;
        last.head_sha1 = head_sha1;
        last.changed = true;
        Ok(info(last, app_id, &SearchOptions::default()))
    }

    fn merge_accept_theirs(
        &self,
        app_id: &ApplicationId,
        name: &str,
        head_sha1: &str,
        user: &str,
    ) -> RepoResult<CubeInfo> {
        let head = app_id.as_head();
        let mut spaces = self.spaces.lock();
        let head_rev = spaces
            .get(&head)
            .and_then(|space| space.get(&name.to_lowercase()))
            .and_then(|revs| revs.iter().rev().find(|r| r.sha1 == head_sha1))
            .cloned()
            .ok_or_else(|| {
                RepoError::Persistence(format!("No head revision of '{}' with sha1 {}", name, head_sha1))
            })?;

        let space = spaces.entry(app_id.clone()).or_default();
        let revs = space.entry(name.to_lowercase()).or_default();
        let rev = self.revision_of(
            current(revs),
            head_rev.sha1.clone(),
            Some(head_rev.sha1.clone()),
            false,
            user,
            head_rev.state.clone(),
            head_rev.revision < 0,
        );
        let result = info(&rev, app_id, &SearchOptions::default());
        revs.push(rev);
        Ok(result)
    }

    fn copy_branch(&self, source: &ApplicationId, target: &ApplicationId) -> RepoResult<usize> {
        let mut spaces = self.spaces.lock();
        let source_revs: Vec<Revision> = spaces
            .get(source)
            .map(|space| space.values().filter_map(|revs| current(revs).cloned()).collect())
            .unwrap_or_default();

        let from_head = source.is_head();
        let mut copied = 0;
        let target_space = spaces.entry(target.clone()).or_default();
        for rev in source_revs {
            let head_sha1 = if from_head {
                Some(rev.sha1.clone())
            } else {
                rev.head_sha1.clone()
            };
            let revs = target_space.entry(rev.state.name.to_lowercase()).or_default();
            let copy = Revision {
                id: self.next_id.fetch_add(1, Ordering::SeqCst),
                revision: if rev.revision < 0 { -1 } else { 0 },
                sha1: rev.sha1,
                head_sha1,
                changed: false,
                notes: rev.notes,
                test_data: rev.test_data,
                created_at: Utc::now(),
                created_by: rev.created_by,
                state: rev.state,
            };
            revs.push(copy);
            copied += 1;
        }
        Ok(copied)
    }

    fn move_branch(&self, app_id: &ApplicationId, new_version: &str) -> RepoResult<usize> {
        let mut spaces = self.spaces.lock();
        let space = match spaces.remove(app_id) {
            Some(space) => space,
            None => return Ok(0),
        };
        let count = space.values().map(|revs| revs.len()).sum();
        spaces.insert(app_id.as_version(new_version), space);
        Ok(count)
    }

    fn release_cubes(
        &self,
        app_id: &ApplicationId,
        _new_snapshot_version: &str,
    ) -> RepoResult<usize> {
        let head = app_id.as_head().as_snapshot();
        let mut spaces = self.spaces.lock();
        let space = match spaces.remove(&head) {
            Some(space) => space,
            None => return Ok(0),
        };
        let count = space
            .values()
            .filter(|revs| current(revs).map(|r| r.revision >= 0).unwrap_or(false))
            .count();
        spaces.insert(head.as_release(), space);
        Ok(count)
    }

    fn delete_branch(&self, app_id: &ApplicationId) -> RepoResult<()> {
        self.spaces.lock().remove(app_id);
        Ok(())
    }

    fn get_app_names(&self, tenant: &str) -> RepoResult<Vec<String>> {
        let spaces = self.spaces.lock();
        let mut names: Vec<String> = spaces
            .keys()
            .filter(|id| id.tenant().eq_ignore_ascii_case(tenant))
            .map(|id| id.app().to_string())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        names.sort();
        Ok(names)
    }

    fn get_versions(
        &self,
        tenant: &str,
        app: &str,
    ) -> RepoResult<HashMap<ReleaseStatus, Vec<String>>> {
        let spaces = self.spaces.lock();
        let mut versions: HashMap<ReleaseStatus, HashSet<String>> = HashMap::new();
        for (id, space) in spaces.iter() {
            if space.is_empty()
                || !id.tenant().eq_ignore_ascii_case(tenant)
                || !id.app().eq_ignore_ascii_case(app)
                || id.version() == SYS_VERSION
            {
                continue;
            }
            versions
                .entry(id.status())
                .or_default()
                .insert(id.version().to_string());
        }
        Ok(versions
            .into_iter()
            .map(|(status, set)| {
                let mut list: Vec<String> = set.into_iter().collect();
                list.sort();
                (status, list)
            })
            .collect())
    }

    fn get_branches(&self, app_id: &ApplicationId) -> RepoResult<HashSet<String>> {
        let spaces = self.spaces.lock();
        let target = app_id.branch_agnostic_cache_key();
        Ok(spaces
            .iter()
            .filter(|(id, space)| {
                !space.is_empty() && id.branch_agnostic_cache_key() == target
            })
            .map(|(id, _)| id.branch().to_string())
            .collect())
    }

    fn update_notes(&self, app_id: &ApplicationId, name: &str, notes: &str) -> RepoResult<()> {
        let mut spaces = self.spaces.lock();
        let rev = spaces
            .get_mut(app_id)
            .and_then(|space| space.get_mut(&name.to_lowercase()))
            .and_then(|revs| revs.last_mut())
            .ok_or_else(|| RepoError::CubeNotFound {
                app_id: app_id.to_string(),
                name: name.to_string(),
            })?;
        rev.notes = Some(notes.to_string());
        Ok(())
    }

    fn get_notes(&self, app_id: &ApplicationId, name: &str) -> RepoResult<String> {
        let spaces = self.spaces.lock();
        let rev = spaces
            .get(app_id)
            .and_then(|space| space.get(&name.to_lowercase()))
            .and_then(|revs| current(revs))
            .ok_or_else(|| RepoError::CubeNotFound {
                app_id: app_id.to_string(),
                name: name.to_string(),
            })?;
        Ok(rev.notes.clone().unwrap_or_default())
    }

    fn update_test_data(
        &self,
        app_id: &ApplicationId,
        name: &str,
        test_data: &str,
    ) -> RepoResult<()> {
        let mut spaces = self.spaces.lock();
        let rev = spaces
            .get_mut(app_id)
            .and_then(|space| space.get_mut(&name.to_lowercase()))
            .and_then(|revs| revs.last_mut())
            .ok_or_else(|| RepoError::CubeNotFound {
                app_id: app_id.to_string(),
                name: name.to_string(),
            })?;
        rev.test_data = Some(test_data.to_string());
        Ok(())
    }

    fn get_test_data(&self, app_id: &ApplicationId, name: &str) -> RepoResult<String> {
        let spaces = self.spaces.lock();
        let rev = spaces
            .get(app_id)
            .and_then(|space| space.get(&name.to_lowercase()))
            .and_then(|revs| current(revs))
            .ok_or_else(|| RepoError::CubeNotFound {
                app_id: app_id.to_string(),
                name: name.to_string(),
            })?;
        Ok(rev.test_data.clone().unwrap_or_default())
    }
}
