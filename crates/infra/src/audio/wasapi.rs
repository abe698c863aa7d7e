//! Windows Core Audio backend
//!
//! Talks to the default render endpoint of the console role: its
//! `IAudioEndpointVolume` for master control and its session manager for
//! per-process `ISimpleAudioVolume` handles.
//!
//! COM is initialized in the multithreaded apartment, where these objects are
//! free-threaded; the volume layer still serializes every call.

use std::ffi::OsString;
use std::os::windows::ffi::OsStringExt;
use std::path::PathBuf;
use tracing::info;
use volware_core::domain::audio::{AudioBackend, AudioError, AudioSession, Result};
use windows::core::{Interface, PWSTR};
use windows::Win32::Foundation::{CloseHandle, BOOL, HANDLE};
use windows::Win32::Media::Audio::Endpoints::IAudioEndpointVolume;
use windows::Win32::Media::Audio::{
    eConsole, eRender, IAudioSessionControl2, IAudioSessionManager2, IMMDevice,
    IMMDeviceEnumerator, ISimpleAudioVolume, MMDeviceEnumerator,
};
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CoUninitialize, CLSCTX_ALL, COINIT_MULTITHREADED,
};
use windows::Win32::System::Threading::{
    OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32, PROCESS_QUERY_LIMITED_INFORMATION,
};

const MAX_IMAGE_PATH: usize = 1024;

fn init_error(step: &str) -> impl FnOnce(windows::core::Error) -> AudioError + '_ {
    move |e| AudioError::Initialization(format!("{}: {}", step, e))
}

fn endpoint_error(e: windows::core::Error) -> AudioError {
    AudioError::Endpoint(e.to_string())
}

/// Balances the `CoInitializeEx` made when the backend was built
struct ComApartment;

impl Drop for ComApartment {
    fn drop(&mut self) {
        unsafe { CoUninitialize() };
    }
}

/// Closes a process handle on every exit path
struct ProcessHandle(HANDLE);

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

/// Core Audio backend on the default output device
pub struct WindowsAudioBackend {
    endpoint: IAudioEndpointVolume,
    session_manager: IAudioSessionManager2,
    // Dropped last: interfaces above must be released before COM goes away.
    _apartment: ComApartment,
}

// SAFETY: the interfaces live in the multithreaded apartment and are
// free-threaded; access is serialized by the owning `VolumeSink`.
unsafe impl Send for WindowsAudioBackend {}

impl WindowsAudioBackend {
    pub fn new() -> Result<Self> {
        unsafe {
            CoInitializeEx(None, COINIT_MULTITHREADED)
                .ok()
                .map_err(init_error("CoInitializeEx"))?;
            let apartment = ComApartment;

            let enumerator: IMMDeviceEnumerator =
                CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                    .map_err(init_error("MMDeviceEnumerator"))?;
            let device: IMMDevice = enumerator
                .GetDefaultAudioEndpoint(eRender, eConsole)
                .map_err(init_error("GetDefaultAudioEndpoint"))?;
            let endpoint: IAudioEndpointVolume = device
                .Activate(CLSCTX_ALL, None)
                .map_err(init_error("IAudioEndpointVolume"))?;
            let session_manager: IAudioSessionManager2 = device
                .Activate(CLSCTX_ALL, None)
                .map_err(init_error("IAudioSessionManager2"))?;

            info!("Core Audio backend ready on default render endpoint");

            Ok(Self {
                endpoint,
                session_manager,
                _apartment: apartment,
            })
        }
    }
}

/// One Core Audio session
struct WindowsSession {
    control: IAudioSessionControl2,
    volume: ISimpleAudioVolume,
    pid: u32,
}

// SAFETY: see `WindowsAudioBackend`.
unsafe impl Send for WindowsSession {}

impl WindowsSession {
    fn session_error(&self) -> impl FnOnce(windows::core::Error) -> AudioError {
        let pid = self.pid;
        move |e| AudioError::Session {
            pid,
            reason: e.to_string(),
        }
    }
}

impl AudioSession for WindowsSession {
    fn process_id(&self) -> Result<u32> {
        unsafe { self.control.GetProcessId() }.map_err(self.session_error())
    }

    fn set_volume(&self, level: f32) -> Result<()> {
        unsafe { self.volume.SetMasterVolume(level, std::ptr::null()) }
            .map_err(self.session_error())
    }

    fn volume(&self) -> Result<f32> {
        unsafe { self.volume.GetMasterVolume() }.map_err(self.session_error())
    }

    fn set_mute(&self, muted: bool) -> Result<()> {
        unsafe { self.volume.SetMute(BOOL::from(muted), std::ptr::null()) }
            .map_err(self.session_error())
    }

    fn is_muted(&self) -> Result<bool> {
        unsafe { self.volume.GetMute() }
            .map(|muted| muted.as_bool())
            .map_err(self.session_error())
    }
}

impl AudioBackend for WindowsAudioBackend {
    fn sessions(&self) -> Result<Vec<Box<dyn AudioSession>>> {
        let enumeration_error = |e: windows::core::Error| AudioError::Enumeration(e.to_string());

        unsafe {
            let list = self
                .session_manager
                .GetSessionEnumerator()
                .map_err(enumeration_error)?;
            let count = list.GetCount().map_err(enumeration_error)?;

            let mut sessions: Vec<Box<dyn AudioSession>> = Vec::new();
            for index in 0..count {
                let Ok(control) = list.GetSession(index) else {
                    continue;
                };
                let Ok(control) = control.cast::<IAudioSessionControl2>() else {
                    continue;
                };
                let Ok(volume) = control.cast::<ISimpleAudioVolume>() else {
                    continue;
                };
                let pid = control.GetProcessId().unwrap_or_default();
                sessions.push(Box::new(WindowsSession {
                    control,
                    volume,
                    pid,
                }));
            }
            Ok(sessions)
        }
    }

    fn set_master_volume(&self, level: f32) -> Result<()> {
        unsafe {
            self.endpoint
                .SetMasterVolumeLevelScalar(level, std::ptr::null())
        }
        .map_err(endpoint_error)
    }

    fn master_volume(&self) -> Result<f32> {
        unsafe { self.endpoint.GetMasterVolumeLevelScalar() }.map_err(endpoint_error)
    }

    fn set_master_mute(&self, muted: bool) -> Result<()> {
        unsafe { self.endpoint.SetMute(BOOL::from(muted), std::ptr::null()) }
            .map_err(endpoint_error)
    }

    fn is_master_muted(&self) -> Result<bool> {
        unsafe { self.endpoint.GetMute() }
            .map(|muted| muted.as_bool())
            .map_err(endpoint_error)
    }

    fn process_image_path(&self, pid: u32) -> Result<PathBuf> {
        let lookup_error = |e: windows::core::Error| AudioError::ProcessLookup {
            pid,
            reason: e.to_string(),
        };

        unsafe {
            let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, BOOL::from(false), pid)
                .map_err(lookup_error)?;
            let handle = ProcessHandle(handle);

            let mut buffer = [0u16; MAX_IMAGE_PATH];
            let mut len = buffer.len() as u32;
            QueryFullProcessImageNameW(
                handle.0,
                PROCESS_NAME_WIN32,
                PWSTR(buffer.as_mut_ptr()),
                &mut len,
            )
            .map_err(lookup_error)?;

            Ok(PathBuf::from(OsString::from_wide(&buffer[..len as usize])))
        }
    }
}
