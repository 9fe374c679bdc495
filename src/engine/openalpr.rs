//! libopenalpr backend
//!
//! Binds the open-source engine's C API (`alpr_c.h`). Results come back as
//! the engine's JSON response string, which is parsed and then freed by the
//! library.

use std::ffi::{c_char, c_int, c_longlong, c_uchar, c_void, CStr, CString};
use std::path::Path;
use std::ptr;

use tracing::{debug, info};

use super::{check_engine_paths, AlprEngine, EngineFactory, RecognitionResult};
use crate::config::EngineConfig;
use crate::error::EngineError;

#[repr(C)]
struct AlprCRegionOfInterest {
    x: c_int,
    y: c_int,
    width: c_int,
    height: c_int,
}

#[link(name = "openalpr")]
extern "C" {
    fn openalpr_init(
        country: *const c_char,
        config_file: *const c_char,
        runtime_dir: *const c_char,
    ) -> *mut c_void;
    fn openalpr_is_loaded(instance: *mut c_void) -> c_int;
    fn openalpr_set_topn(instance: *mut c_void, top_n: c_int);
    fn openalpr_set_default_region(instance: *mut c_void, region: *const c_char);
    fn openalpr_recognize_encodedimage(
        instance: *mut c_void,
        bytes: *mut c_uchar,
        length: c_longlong,
        roi: AlprCRegionOfInterest,
    ) -> *mut c_char;
    fn openalpr_free_response_string(response: *mut c_char);
    fn openalpr_cleanup(instance: *mut c_void);
}

/// Engine instance backed by libopenalpr
pub struct OpenAlprEngine {
    instance: *mut c_void,
}

// SAFETY: the instance is only touched through `&mut self`, and the stage
// never lets two threads use one engine at the same time.
unsafe impl Send for OpenAlprEngine {}

impl OpenAlprEngine {
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        check_engine_paths(config)?;

        let country = c_string("country_code", &config.country_code)?;
        let config_file = path_c_string("config_path", &config.config_path)?;
        let runtime_dir = path_c_string("runtime_data_path", &config.runtime_data_path)?;

        info!(
            "Loading libopenalpr (country '{}', config {:?}, runtime data {:?})",
            config.country_code, config.config_path, config.runtime_data_path
        );

        // SAFETY: all pointers are valid NUL-terminated strings for the duration of the call.
        let instance = unsafe {
            openalpr_init(
                country.as_ptr(),
                config_file.as_ptr(),
                runtime_dir.as_ptr(),
            )
        };
        if instance.is_null() {
            return Err(EngineError::backend("openalpr_init returned no instance"));
        }

        let engine = Self { instance };
        // SAFETY: instance is non-null and owned by `engine`.
        if unsafe { openalpr_is_loaded(engine.instance) } == 0 {
            // dropping `engine` cleans up the half-loaded instance
            return Err(EngineError::Rejected {
                setting: "country_code",
                value: config.country_code.clone(),
            });
        }

        Ok(engine)
    }
}

impl AlprEngine for OpenAlprEngine {
    fn name(&self) -> &'static str {
        "openalpr"
    }

    fn set_top_n(&mut self, top_n: u32) -> Result<(), EngineError> {
        let value = c_int::try_from(top_n).map_err(|_| EngineError::Rejected {
            setting: "top_n",
            value: top_n.to_string(),
        })?;
        // SAFETY: instance is live until `unload`.
        unsafe { openalpr_set_topn(self.instance, value) };
        Ok(())
    }

    fn set_default_region(&mut self, region: &str) -> Result<(), EngineError> {
        let region = c_string("default_region", region)?;
        // SAFETY: instance is live; the string outlives the call.
        unsafe { openalpr_set_default_region(self.instance, region.as_ptr()) };
        Ok(())
    }

    fn recognize(&mut self, image: &[u8]) -> Result<RecognitionResult, EngineError> {
        if self.instance.is_null() {
            return Err(EngineError::backend("engine has been unloaded"));
        }

        // Full-image region of interest
        let (width, height) = image::ImageReader::new(std::io::Cursor::new(image))
            .with_guessed_format()
            .map_err(|e| EngineError::backend(format!("could not read image header: {e}")))?
            .into_dimensions()
            .map_err(|e| EngineError::backend(format!("could not read image header: {e}")))?;
        let roi = AlprCRegionOfInterest {
            x: 0,
            y: 0,
            width: c_int::try_from(width).unwrap_or(c_int::MAX),
            height: c_int::try_from(height).unwrap_or(c_int::MAX),
        };

        let mut buffer = image.to_vec();
        debug!("openalpr: recognizing {} byte image ({}x{})", buffer.len(), width, height);

        // SAFETY: buffer is valid for `len` bytes and only read by the library.
        let response = unsafe {
            openalpr_recognize_encodedimage(
                self.instance,
                buffer.as_mut_ptr(),
                buffer.len() as c_longlong,
                roi,
            )
        };
        if response.is_null() {
            return Err(EngineError::malformed("engine returned no response"));
        }

        // SAFETY: response is a NUL-terminated string owned by the library until freed.
        let json = unsafe { CStr::from_ptr(response) }.to_string_lossy().into_owned();
        // SAFETY: response came from openalpr_recognize_encodedimage and is freed once.
        unsafe { openalpr_free_response_string(response) };

        RecognitionResult::from_json(&json)
    }

    fn unload(&mut self) {
        if !self.instance.is_null() {
            // SAFETY: instance came from openalpr_init and is cleaned up once.
            unsafe { openalpr_cleanup(self.instance) };
            self.instance = ptr::null_mut();
        }
    }
}

impl Drop for OpenAlprEngine {
    fn drop(&mut self) {
        self.unload();
    }
}

/// Factory for [`OpenAlprEngine`]
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAlprFactory;

impl EngineFactory for OpenAlprFactory {
    fn name(&self) -> &'static str {
        "openalpr"
    }

    fn create(&self, config: &EngineConfig) -> Result<Box<dyn AlprEngine>, EngineError> {
        Ok(Box::new(OpenAlprEngine::new(config)?))
    }
}

fn c_string(setting: &'static str, value: &str) -> Result<CString, EngineError> {
    CString::new(value).map_err(|_| EngineError::Rejected {
        setting,
        value: value.to_string(),
    })
}

fn path_c_string(setting: &'static str, path: &Path) -> Result<CString, EngineError> {
    let value = path.to_str().ok_or_else(|| EngineError::Rejected {
        setting,
        value: path.display().to_string(),
    })?;
    c_string(setting, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    type InitFn = unsafe extern "C" fn(*const c_char, *const c_char, *const c_char) -> *mut c_void;
    type RecognizeFn = unsafe extern "C" fn(
        *mut c_void,
        *mut c_uchar,
        c_longlong,
        AlprCRegionOfInterest,
    ) -> *mut c_char;

    #[test]
    fn test_bindings_match_c_header() {
        let _: InitFn = openalpr_init;
        let _: RecognizeFn = openalpr_recognize_encodedimage;
    }

    #[test]
    fn test_interior_nul_is_rejected() {
        let err = c_string("default_region", "g\0a").unwrap_err();
        assert!(matches!(err, EngineError::Rejected { setting: "default_region", .. }));
    }
}
