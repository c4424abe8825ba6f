//! Dynamic-library backed implementation of [`ModulePlugin`].
//!
//! Loads a native module plugin (§6.3) via `libloading` and calls through
//! its C ABI. The plugin's `context` pointer is opaque to us; we only pass
//! it back to the plugin on every call and free it via `destroy` on drop.

use std::ffi::{c_void, CString};
use std::os::raw::{c_char, c_int};
use std::time::Duration;

use libloading::Library;

use super::{DisconnectKind, ModulePlugin, PluginConfigEntry, PluginError, WaitOutcome};
use crate::device::Device;
use crate::error_code::ErrorCode;

#[repr(C)]
struct CBuffer {
    data: *mut u8,
    len: usize,
}

#[repr(C)]
struct CDeviceIdentification {
    module: u32,
    device_type: u32,
    device_role: *const c_char,
    device_name: *const c_char,
    priority: u32,
}

#[repr(C)]
struct CKeyValue {
    key: CBuffer,
    value: CBuffer,
}

#[repr(C)]
struct CConfig {
    entries: *const CKeyValue,
    len: usize,
}

type InitFn = unsafe extern "C" fn(CConfig) -> *mut c_void;
type DestroyFn = unsafe extern "C" fn(*mut c_void) -> c_int;
type GetModuleNumberFn = unsafe extern "C" fn(*mut c_void) -> c_int;
type IsDeviceTypeSupportedFn = unsafe extern "C" fn(u32, *mut c_void) -> c_int;
type DeviceConnectedFn = unsafe extern "C" fn(CDeviceIdentification, *mut c_void) -> c_int;
type DeviceDisconnectedFn =
    unsafe extern "C" fn(c_int, CDeviceIdentification, *mut c_void) -> c_int;
type ForwardBufferFn = unsafe extern "C" fn(CBuffer, CDeviceIdentification, *mut c_void) -> c_int;
type WaitForCommandFn = unsafe extern "C" fn(u32, *mut c_void) -> c_int;
type PopCommandFn =
    unsafe extern "C" fn(*mut CBuffer, *mut CDeviceIdentification, *mut c_void) -> c_int;
type DeallocateFn = unsafe extern "C" fn(CBuffer);

/// A module plugin loaded from a dynamic library.
pub struct FfiModulePlugin {
    // Kept alive for the lifetime of the plugin; symbols borrow from it.
    _library: Library,
    context: *mut c_void,
    destroy: DestroyFn,
    get_module_number: GetModuleNumberFn,
    is_device_type_supported_fn: IsDeviceTypeSupportedFn,
    device_connected_fn: DeviceConnectedFn,
    device_disconnected_fn: DeviceDisconnectedFn,
    forward_status_fn: ForwardBufferFn,
    forward_error_message_fn: ForwardBufferFn,
    wait_for_command_fn: WaitForCommandFn,
    pop_command_fn: PopCommandFn,
    command_ack_fn: ForwardBufferFn,
    deallocate: DeallocateFn,
}

impl FfiModulePlugin {
    /// Load the plugin at `lib_path` and call its `init` with the supplied
    /// configuration entries.
    ///
    /// # Errors
    /// Returns [`PluginError::Load`] if the library or any required symbol
    /// cannot be resolved.
    ///
    /// # Safety
    /// The caller must ensure `lib_path` names a library that faithfully
    /// implements the module plugin C ABI (§6.3); a mismatched ABI is
    /// undefined behavior.
    pub unsafe fn load(
        lib_path: &str,
        config: &[PluginConfigEntry],
    ) -> Result<Self, PluginError> {
        let library =
            Library::new(lib_path).map_err(|e| PluginError::Load(format!("{lib_path}: {e}")))?;

        macro_rules! symbol {
            ($name:literal) => {
                *library
                    .get($name)
                    .map_err(|e| PluginError::Load(format!("missing symbol {:?}: {e}", $name)))?
            };
        }

        let init: InitFn = symbol!(b"init");
        let destroy: DestroyFn = symbol!(b"destroy");
        let get_module_number: GetModuleNumberFn = symbol!(b"get_module_number");
        let is_device_type_supported_fn: IsDeviceTypeSupportedFn =
            symbol!(b"is_device_type_supported");
        let device_connected_fn: DeviceConnectedFn = symbol!(b"device_connected");
        let device_disconnected_fn: DeviceDisconnectedFn = symbol!(b"device_disconnected");
        let forward_status_fn: ForwardBufferFn = symbol!(b"forward_status");
        let forward_error_message_fn: ForwardBufferFn = symbol!(b"forward_error_message");
        let wait_for_command_fn: WaitForCommandFn = symbol!(b"wait_for_command");
        let pop_command_fn: PopCommandFn = symbol!(b"pop_command");
        let command_ack_fn: ForwardBufferFn = symbol!(b"command_ack");
        let deallocate: DeallocateFn = symbol!(b"deallocate");

        let c_entries: Vec<CKeyValue> = config
            .iter()
            .map(|(k, v)| CKeyValue {
                key: CBuffer {
                    data: k.as_ptr() as *mut u8,
                    len: k.len(),
                },
                value: CBuffer {
                    data: v.as_ptr() as *mut u8,
                    len: v.len(),
                },
            })
            .collect();
        let c_config = CConfig {
            entries: c_entries.as_ptr(),
            len: c_entries.len(),
        };
        let context = init(c_config);
        drop(c_entries);

        Ok(Self {
            _library: library,
            context,
            destroy,
            get_module_number,
            is_device_type_supported_fn,
            device_connected_fn,
            device_disconnected_fn,
            forward_status_fn,
            forward_error_message_fn,
            wait_for_command_fn,
            pop_command_fn,
            command_ack_fn,
            deallocate,
        })
    }

    fn device_identification(device: &Device) -> (CDeviceIdentification, CString, CString) {
        let role = CString::new(device.device_role.clone()).unwrap_or_default();
        let name = CString::new(device.device_name.clone()).unwrap_or_default();
        let c = CDeviceIdentification {
            module: device.module,
            device_type: device.device_type,
            device_role: role.as_ptr(),
            device_name: name.as_ptr(),
            priority: device.priority,
        };
        (c, role, name)
    }
}

impl Drop for FfiModulePlugin {
    fn drop(&mut self) {
        unsafe {
            (self.destroy)(self.context);
        }
    }
}

// SAFETY: the module host serializes every call except `wait_for_command`
// behind a mutex per §5; the raw pointer is never accessed concurrently.
unsafe impl Send for FfiModulePlugin {}

impl ModulePlugin for FfiModulePlugin {
    fn module_number(&self) -> i32 {
        unsafe { (self.get_module_number)(self.context) }
    }

    fn is_device_type_supported(&self, device_type: u32) -> bool {
        unsafe { (self.is_device_type_supported_fn)(device_type, self.context) != 0 }
    }

    fn device_connected(&mut self, device: &Device) -> Result<(), PluginError> {
        let (c_device, _role, _name) = Self::device_identification(device);
        let code = unsafe { (self.device_connected_fn)(c_device, self.context) };
        ok_or_failed(code)
    }

    fn device_disconnected(
        &mut self,
        kind: DisconnectKind,
        device: &Device,
    ) -> Result<(), PluginError> {
        let (c_device, _role, _name) = Self::device_identification(device);
        let code =
            unsafe { (self.device_disconnected_fn)(kind as c_int, c_device, self.context) };
        ok_or_failed(code)
    }

    fn forward_status(&mut self, buffer: &[u8], device: &Device) -> Result<(), PluginError> {
        let (c_device, _role, _name) = Self::device_identification(device);
        let c_buffer = CBuffer {
            data: buffer.as_ptr() as *mut u8,
            len: buffer.len(),
        };
        let code = unsafe { (self.forward_status_fn)(c_buffer, c_device, self.context) };
        ok_or_failed(code)
    }

    fn forward_error_message(
        &mut self,
        buffer: &[u8],
        device: &Device,
    ) -> Result<(), PluginError> {
        let (c_device, _role, _name) = Self::device_identification(device);
        let c_buffer = CBuffer {
            data: buffer.as_ptr() as *mut u8,
            len: buffer.len(),
        };
        let code = unsafe { (self.forward_error_message_fn)(c_buffer, c_device, self.context) };
        ok_or_failed(code)
    }

    fn wait_for_command(&mut self, timeout: Duration) -> Result<WaitOutcome, PluginError> {
        let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        let code = unsafe { (self.wait_for_command_fn)(timeout_ms, self.context) };
        match ErrorCode::from_raw(code) {
            ErrorCode::Ok => Ok(WaitOutcome::Ready),
            ErrorCode::Timeout => Ok(WaitOutcome::TimedOut),
            other => Err(PluginError::Failed(other)),
        }
    }

    fn pop_command(&mut self) -> Result<Option<(Vec<u8>, Device)>, PluginError> {
        let mut out_buffer = CBuffer {
            data: std::ptr::null_mut(),
            len: 0,
        };
        let mut out_device = CDeviceIdentification {
            module: 0,
            device_type: 0,
            device_role: std::ptr::null(),
            device_name: std::ptr::null(),
            priority: 0,
        };
        let remaining =
            unsafe { (self.pop_command_fn)(&mut out_buffer, &mut out_device, self.context) };
        if remaining < 0 {
            return Err(PluginError::Failed(ErrorCode::from_raw(remaining)));
        }
        if out_buffer.data.is_null() {
            return Ok(None);
        }
        let data = unsafe { std::slice::from_raw_parts(out_buffer.data, out_buffer.len) }.to_vec();
        let device = unsafe { device_from_raw(&out_device) };
        unsafe { (self.deallocate)(out_buffer) };
        Ok(Some((data, device)))
    }

    fn command_ack(&mut self, buffer: &[u8], device: &Device) -> Result<(), PluginError> {
        let (c_device, _role, _name) = Self::device_identification(device);
        let c_buffer = CBuffer {
            data: buffer.as_ptr() as *mut u8,
            len: buffer.len(),
        };
        let code = unsafe { (self.command_ack_fn)(c_buffer, c_device, self.context) };
        ok_or_failed(code)
    }
}

fn ok_or_failed(code: c_int) -> Result<(), PluginError> {
    let error_code = ErrorCode::from_raw(code);
    if error_code.is_ok() {
        Ok(())
    } else {
        Err(PluginError::Failed(error_code))
    }
}

unsafe fn device_from_raw(raw: &CDeviceIdentification) -> Device {
    let role = if raw.device_role.is_null() {
        String::new()
    } else {
        std::ffi::CStr::from_ptr(raw.device_role)
            .to_string_lossy()
            .into_owned()
    };
    let name = if raw.device_name.is_null() {
        String::new()
    } else {
        std::ffi::CStr::from_ptr(raw.device_name)
            .to_string_lossy()
            .into_owned()
    };
    Device {
        module: raw.module,
        device_type: raw.device_type,
        device_role: role,
        device_name: name,
        priority: raw.priority,
    }
}
