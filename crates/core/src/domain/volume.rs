//! Volume and mute application
//!
//! [`VolumeSink`] is the only path into the audio backend. Every call takes
//! one exclusive lock for its whole duration, so a slider update from the
//! serial worker and a mute toggle from the control thread never interleave
//! at the backend level.

use crate::domain::audio::{AudioBackend, Result};
use crate::domain::router::VolumeCommand;
use crate::domain::session::SessionResolver;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

/// Reserved application name addressing the default output endpoint
pub const MASTER: &str = "master";

/// What a volume or mute command acts on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// The default output endpoint itself
    Master,
    /// Every session owned by a process with this executable name
    Process(String),
}

impl Target {
    /// Interpret a configured application name; `master` in any case
    /// selects the endpoint.
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case(MASTER) {
            Target::Master
        } else {
            Target::Process(name.to_string())
        }
    }
}

impl From<&str> for Target {
    fn from(name: &str) -> Self {
        Self::from_name(name)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Master => write!(f, "{}", MASTER),
            Target::Process(name) => write!(f, "{}", name),
        }
    }
}

/// Clamp a requested level into `[0, 1]`. NaN is treated as silence.
pub fn clamp_level(level: f32) -> f32 {
    if level.is_nan() {
        0.0
    } else {
        level.clamp(0.0, 1.0)
    }
}

/// Applies volume and mute state to the endpoint or to resolved sessions
pub struct VolumeSink {
    backend: Mutex<Box<dyn AudioBackend>>,
    resolver: SessionResolver,
}

impl VolumeSink {
    pub fn new(backend: Box<dyn AudioBackend>, resolver: SessionResolver) -> Self {
        Self {
            backend: Mutex::new(backend),
            resolver,
        }
    }

    pub fn resolver(&self) -> &SessionResolver {
        &self.resolver
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn AudioBackend>> {
        self.backend.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the volume of one target.
    ///
    /// Stops at the first session that fails; sessions after it keep their
    /// previous volume. A process with no live sessions is a successful no-op.
    pub fn apply_volume(&self, target: &Target, level: f32) -> Result<()> {
        let backend = self.lock();
        self.volume_locked(&**backend, target, clamp_level(level))
    }

    /// Set the volume of each target in order, stopping at the first failure.
    pub fn apply_volume_all(&self, targets: &[Target], level: f32) -> Result<()> {
        let level = clamp_level(level);
        let backend = self.lock();
        for target in targets {
            self.volume_locked(&**backend, target, level)?;
        }
        Ok(())
    }

    /// Set the mute state of one target explicitly.
    pub fn apply_mute(&self, target: &Target, muted: bool) -> Result<()> {
        let backend = self.lock();
        self.mute_locked(&**backend, target, muted)
    }

    /// Set the mute state of each target in order, stopping at the first failure.
    pub fn apply_mute_all(&self, targets: &[Target], muted: bool) -> Result<()> {
        let backend = self.lock();
        for target in targets {
            self.mute_locked(&**backend, target, muted)?;
        }
        Ok(())
    }

    /// Flip the mute state of a target and return the new state.
    ///
    /// Each matching session is flipped on its own. When no session matches,
    /// nothing changes and `false` is returned.
    pub fn toggle_mute(&self, target: &Target) -> Result<bool> {
        let backend = self.lock();
        match target {
            Target::Master => {
                let muted = !backend.is_master_muted()?;
                backend.set_master_mute(muted)?;
                debug!(muted, "Master mute toggled");
                Ok(muted)
            }
            Target::Process(name) => {
                let mut last = false;
                for session in self.resolver.resolve_sessions(&**backend, name) {
                    last = !session.is_muted()?;
                    session.set_mute(last)?;
                }
                debug!(process = %name, muted = last, "Process mute toggled");
                Ok(last)
            }
        }
    }

    /// Apply commands in order under one lock, stopping at the first failure.
    ///
    /// Each command sets its target's volume and then, if it carries a mute
    /// flag, the mute state.
    pub fn apply_commands(&self, commands: &[VolumeCommand]) -> Result<()> {
        let backend = self.lock();
        for command in commands {
            self.volume_locked(&**backend, &command.target, clamp_level(command.level))?;
            if let Some(muted) = command.mute {
                self.mute_locked(&**backend, &command.target, muted)?;
            }
        }
        Ok(())
    }

    pub fn set_master_volume(&self, level: f32) -> Result<()> {
        self.apply_volume(&Target::Master, level)
    }

    pub fn set_master_mute(&self, muted: bool) -> Result<()> {
        self.apply_mute(&Target::Master, muted)
    }

    fn volume_locked(&self, backend: &dyn AudioBackend, target: &Target, level: f32) -> Result<()> {
        match target {
            Target::Master => backend.set_master_volume(level),
            Target::Process(name) => {
                for session in self.resolver.resolve_sessions(backend, name) {
                    session.set_volume(level)?;
                }
                trace!(process = %name, level, "Volume applied");
                Ok(())
            }
        }
    }

    fn mute_locked(&self, backend: &dyn AudioBackend, target: &Target, muted: bool) -> Result<()> {
        match target {
            Target::Master => backend.set_master_mute(muted),
            Target::Process(name) => {
                for session in self.resolver.resolve_sessions(backend, name) {
                    session.set_mute(muted)?;
                }
                trace!(process = %name, muted, "Mute applied");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::audio::{AudioError, AudioSession};
    use crate::domain::session::DEFAULT_CACHE_TTL;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    /// Shared record of what the backend saw
    #[derive(Default)]
    struct Journal {
        master_volume: Mutex<f32>,
        master_muted: AtomicBool,
        session_volumes: Mutex<Vec<(u32, f32)>>,
        session_mutes: Mutex<Vec<(u32, bool)>>,
        failing_pids: Mutex<Vec<u32>>,
        in_call: AtomicBool,
        overlaps: AtomicUsize,
    }

    impl Journal {
        /// Marks a backend call in flight; counts any overlap with another one
        fn enter(&self) -> CallGuard<'_> {
            if self.in_call.swap(true, Ordering::SeqCst) {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            CallGuard(self)
        }
    }

    struct CallGuard<'a>(&'a Journal);

    impl Drop for CallGuard<'_> {
        fn drop(&mut self) {
            self.0.in_call.store(false, Ordering::SeqCst);
        }
    }

    struct FakeSession {
        pid: u32,
        muted: bool,
        journal: Arc<Journal>,
    }

    impl AudioSession for FakeSession {
        fn process_id(&self) -> crate::domain::audio::Result<u32> {
            Ok(self.pid)
        }
        fn set_volume(&self, level: f32) -> crate::domain::audio::Result<()> {
            let _call = self.journal.enter();
            thread::sleep(Duration::from_micros(50));
            if self.journal.failing_pids.lock().unwrap().contains(&self.pid) {
                return Err(AudioError::Session {
                    pid: self.pid,
                    reason: "busy".to_string(),
                });
            }
            self.journal.session_volumes.lock().unwrap().push((self.pid, level));
            Ok(())
        }
        fn volume(&self) -> crate::domain::audio::Result<f32> {
            Ok(1.0)
        }
        fn set_mute(&self, muted: bool) -> crate::domain::audio::Result<()> {
            let _call = self.journal.enter();
            thread::sleep(Duration::from_micros(50));
            self.journal.session_mutes.lock().unwrap().push((self.pid, muted));
            Ok(())
        }
        fn is_muted(&self) -> crate::domain::audio::Result<bool> {
            Ok(self.muted)
        }
    }

    struct FakeBackend {
        /// (pid, executable path, muted)
        processes: Vec<(u32, &'static str, bool)>,
        journal: Arc<Journal>,
    }

    impl AudioBackend for FakeBackend {
        fn sessions(&self) -> crate::domain::audio::Result<Vec<Box<dyn AudioSession>>> {
            Ok(self
                .processes
                .iter()
                .map(|&(pid, _, muted)| {
                    Box::new(FakeSession {
                        pid,
                        muted,
                        journal: Arc::clone(&self.journal),
                    }) as Box<dyn AudioSession>
                })
                .collect())
        }
        fn set_master_volume(&self, level: f32) -> crate::domain::audio::Result<()> {
            let _call = self.journal.enter();
            *self.journal.master_volume.lock().unwrap() = level;
            Ok(())
        }
        fn master_volume(&self) -> crate::domain::audio::Result<f32> {
            Ok(*self.journal.master_volume.lock().unwrap())
        }
        fn set_master_mute(&self, muted: bool) -> crate::domain::audio::Result<()> {
            let _call = self.journal.enter();
            thread::sleep(Duration::from_micros(50));
            self.journal.master_muted.store(muted, Ordering::SeqCst);
            Ok(())
        }
        fn is_master_muted(&self) -> crate::domain::audio::Result<bool> {
            Ok(self.journal.master_muted.load(Ordering::SeqCst))
        }
        fn process_image_path(&self, pid: u32) -> crate::domain::audio::Result<PathBuf> {
            self.processes
                .iter()
                .find(|(p, _, _)| *p == pid)
                .map(|(_, path, _)| PathBuf::from(path))
                .ok_or(AudioError::ProcessLookup {
                    pid,
                    reason: "gone".to_string(),
                })
        }
    }

    fn sink(processes: Vec<(u32, &'static str, bool)>) -> (VolumeSink, Arc<Journal>) {
        let journal = Arc::new(Journal::default());
        let backend = FakeBackend {
            processes,
            journal: Arc::clone(&journal),
        };
        let sink = VolumeSink::new(Box::new(backend), SessionResolver::with_ttl(DEFAULT_CACHE_TTL));
        (sink, journal)
    }

    #[test]
    fn test_target_from_name() {
        assert_eq!(Target::from_name("MASTER"), Target::Master);
        assert_eq!(
            Target::from_name("music.exe"),
            Target::Process("music.exe".to_string())
        );
        assert_eq!(Target::Master.to_string(), "master");
    }

    #[test]
    fn test_clamp_level() {
        assert_eq!(clamp_level(1.7), 1.0);
        assert_eq!(clamp_level(-0.2), 0.0);
        assert_eq!(clamp_level(f32::NAN), 0.0);
        assert_eq!(clamp_level(0.25), 0.25);
    }

    #[test]
    fn test_master_volume_is_clamped() {
        let (sink, journal) = sink(vec![]);
        sink.set_master_volume(3.0).unwrap();
        assert_eq!(*journal.master_volume.lock().unwrap(), 1.0);
    }

    #[test]
    fn test_volume_reaches_every_matching_session() {
        let (sink, journal) = sink(vec![
            (1, "/bin/music.exe", false),
            (2, "/bin/music.exe", false),
            (3, "/bin/chat.exe", false),
        ]);

        sink.apply_volume(&Target::from_name("music.exe"), 0.5).unwrap();

        let volumes = journal.session_volumes.lock().unwrap().clone();
        assert_eq!(volumes, vec![(1, 0.5), (2, 0.5)]);
    }

    #[test]
    fn test_no_live_session_is_a_noop() {
        let (sink, journal) = sink(vec![(1, "/bin/chat.exe", false)]);
        sink.apply_volume(&Target::from_name("music.exe"), 0.5).unwrap();
        assert!(journal.session_volumes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_batch_stops_at_first_failure() {
        let (sink, journal) = sink(vec![(1, "/bin/appA", false), (2, "/bin/appB", false)]);
        journal.failing_pids.lock().unwrap().push(1);

        let targets = [Target::from_name("appA"), Target::from_name("appB")];
        let result = sink.apply_volume_all(&targets, 0.3);

        assert!(matches!(result, Err(AudioError::Session { pid: 1, .. })));
        assert!(journal.session_volumes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_commands_apply_volume_then_mute_in_order() {
        let (sink, journal) = sink(vec![(1, "/bin/chat.exe", false), (2, "/bin/game", false)]);
        let commands = [
            VolumeCommand {
                target: Target::Master,
                level: 1.4,
                mute: Some(true),
            },
            VolumeCommand {
                target: Target::from_name("chat.exe"),
                level: 0.25,
                mute: None,
            },
            VolumeCommand {
                target: Target::from_name("game"),
                level: 0.5,
                mute: Some(false),
            },
        ];

        sink.apply_commands(&commands).unwrap();

        assert_eq!(*journal.master_volume.lock().unwrap(), 1.0);
        assert!(journal.master_muted.load(Ordering::SeqCst));
        assert_eq!(
            journal.session_volumes.lock().unwrap().clone(),
            vec![(1, 0.25), (2, 0.5)]
        );
        assert_eq!(journal.session_mutes.lock().unwrap().clone(), vec![(2, false)]);
    }

    #[test]
    fn test_commands_stop_at_first_failure() {
        let (sink, journal) = sink(vec![(1, "/bin/appA", false), (2, "/bin/appB", false)]);
        journal.failing_pids.lock().unwrap().push(1);
        let commands = [
            VolumeCommand {
                target: Target::from_name("appA"),
                level: 0.3,
                mute: Some(true),
            },
            VolumeCommand {
                target: Target::from_name("appB"),
                level: 0.3,
                mute: Some(true),
            },
        ];

        let result = sink.apply_commands(&commands);

        assert!(matches!(result, Err(AudioError::Session { pid: 1, .. })));
        assert!(journal.session_volumes.lock().unwrap().is_empty());
        assert!(journal.session_mutes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_mute_is_explicit_not_toggle() {
        let (sink, journal) = sink(vec![(4, "/bin/game", true)]);
        sink.apply_mute(&Target::from_name("game"), true).unwrap();
        assert_eq!(journal.session_mutes.lock().unwrap().clone(), vec![(4, true)]);
    }

    #[test]
    fn test_toggle_master_mute() {
        let (sink, journal) = sink(vec![]);
        assert!(sink.toggle_mute(&Target::Master).unwrap());
        assert!(journal.master_muted.load(Ordering::SeqCst));
        assert!(!sink.toggle_mute(&Target::Master).unwrap());
    }

    #[test]
    fn test_toggle_process_mute_flips_each_session() {
        let (sink, journal) = sink(vec![(1, "/bin/game", true), (2, "/bin/game", false)]);
        assert!(sink.toggle_mute(&Target::from_name("game")).unwrap());
        assert_eq!(
            journal.session_mutes.lock().unwrap().clone(),
            vec![(1, false), (2, true)]
        );
    }

    #[test]
    fn test_concurrent_calls_never_overlap() {
        let (sink, journal) = sink(vec![(1, "/bin/music.exe", false)]);
        let sink = Arc::new(sink);

        let slider = {
            let sink = Arc::clone(&sink);
            thread::spawn(move || {
                for i in 0..200 {
                    sink.apply_volume(&Target::from_name("music.exe"), i as f32 / 200.0)
                        .unwrap();
                }
            })
        };
        let menu = {
            let sink = Arc::clone(&sink);
            thread::spawn(move || {
                for _ in 0..200 {
                    sink.toggle_mute(&Target::Master).unwrap();
                }
            })
        };

        slider.join().unwrap();
        menu.join().unwrap();

        assert_eq!(journal.overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(journal.session_volumes.lock().unwrap().len(), 200);
    }
}
