//! POSIX interposition: the preloaded library replaces the exec and
//! posix_spawn entry points of every traced process.
//!
//! Each intercepted call is rewritten into an invocation of the proxy
//! (`-p <own id> --exec <program> -- <argv...>`) with the interception state
//! re-injected into the call's environment, then delegated to the real libc
//! entry point so blocking behavior and status propagation stay untouched.

pub mod marshal;

use std::ffi::CStr;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use libc::{c_char, c_int};

use chaperone_wire::{environ, IpcId};

use crate::{proxy_argv, scrub_environment};

/// Marker state captured at activation, before the environment scrub.
struct Context {
    id: IpcId,
    proxy_path: String,
    /// Where this library is mapped. `None` means re-injection is
    /// impossible; intercepted calls are then routed through the proxy's
    /// error channel instead of running untraced.
    shim_path: Option<String>,
}

enum State {
    /// Loaded without markers: this process was not launched by a proxy.
    /// Interception coverage cannot be guaranteed, so calls fail loudly.
    Unmarked,
    /// This process *is* the proxy image; its own spawns must pass through
    /// untouched or the tree would recurse forever.
    ProxyImage,
    Traced(Context),
}

static STATE: OnceLock<State> = OnceLock::new();

#[ctor::ctor]
fn activate() {
    let id = std::env::var(environ::KEY_IPC_ID).ok();
    let proxy_path = std::env::var(environ::KEY_PROXY_PATH).ok();
    let shim_path = own_library_path();

    scrub_environment();

    let state = match (id.and_then(|v| v.parse::<IpcId>().ok()), proxy_path) {
        (Some(id), Some(proxy_path)) => {
            if is_current_exe(&proxy_path) {
                State::ProxyImage
            } else {
                State::Traced(Context {
                    id,
                    proxy_path,
                    shim_path,
                })
            }
        }
        _ => State::Unmarked,
    };
    let _ = STATE.set(state);
}

fn is_current_exe(candidate: &str) -> bool {
    match (std::env::current_exe(), std::fs::canonicalize(candidate)) {
        (Ok(own), Ok(other)) => own == other,
        _ => false,
    }
}

/// Where this library itself is mapped, for re-injection further down.
fn own_library_path() -> Option<String> {
    static ANCHOR: u8 = 0;
    let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
    let found = unsafe {
        libc::dladdr(
            &ANCHOR as *const u8 as *const libc::c_void,
            &mut info,
        )
    };
    if found == 0 || info.dli_fname.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(info.dli_fname) }.to_string_lossy().into_owned())
}

fn set_errno(value: c_int) {
    #[cfg(target_os = "linux")]
    unsafe {
        *libc::__errno_location() = value;
    }
    #[cfg(target_os = "macos")]
    unsafe {
        *libc::__error() = value;
    }
}

/// An exec that must not proceed untraced. errno convention of the exec
/// family: -1 with errno set.
fn refuse(entry_point: &str) -> c_int {
    eprintln!(
        "chaperone-shim: {entry_point} intercepted without session markers; \
         refusing to run untraced"
    );
    set_errno(libc::ENOSYS);
    -1
}

/// Resolve a `p`-variant program name the way the libc call would have,
/// using the caller's PATH. Names containing a slash resolve as paths.
fn resolve_program(program: &str, path_var: Option<&str>) -> Option<String> {
    if program.contains('/') {
        return Some(program.to_string());
    }
    for dir in path_var?.split(':') {
        let dir = if dir.is_empty() { "." } else { dir };
        let candidate = Path::new(dir).join(program);
        if is_executable(&candidate) {
            return Some(candidate.to_string_lossy().into_owned());
        }
    }
    None
}

fn is_executable(path: &PathBuf) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// The rewritten call: proxy argv plus the call's environment with the
/// interception state re-injected.
///
/// When the shim cannot re-inject itself, the rewritten call is the proxy's
/// error channel instead: the payload after `--exec <program>` is a
/// diagnostic rather than a `--` separator, so the session still learns
/// about the failure.
fn rewritten(
    ctx: &Context,
    program: &str,
    argv: Vec<String>,
    mut env: Vec<String>,
) -> (Vec<String>, Vec<String>) {
    match &ctx.shim_path {
        Some(shim_path) => {
            environ::inject(&mut env, ctx.id, &ctx.proxy_path, shim_path);
            (proxy_argv(&ctx.proxy_path, ctx.id, program, &argv), env)
        }
        None => {
            let report = vec![
                ctx.proxy_path.clone(),
                "-p".to_string(),
                ctx.id.to_string(),
                "--exec".to_string(),
                program.to_string(),
                "interception payload could not locate its own library".to_string(),
            ];
            (report, env)
        }
    }
}

/// Current process environment as `KEY=VALUE` entries, for the exec variants
/// that implicitly use `environ`.
fn current_env() -> Vec<String> {
    std::env::vars()
        .map(|(key, value)| format!("{key}={value}"))
        .collect()
}

mod real {
    use std::ffi::CStr;

    use libc::{c_char, c_int};

    unsafe fn resolve(name: &CStr) -> *mut libc::c_void {
        let sym = libc::dlsym(libc::RTLD_NEXT, name.as_ptr());
        if sym.is_null() {
            // Without the real entry point there is no correct way to
            // continue in this process.
            eprintln!(
                "chaperone-shim: real {} not found via RTLD_NEXT",
                name.to_string_lossy()
            );
            libc::abort();
        }
        sym
    }

    pub type ExecveFn = unsafe extern "C" fn(
        *const c_char,
        *const *const c_char,
        *const *const c_char,
    ) -> c_int;

    pub unsafe fn execve() -> ExecveFn {
        std::mem::transmute(resolve(c"execve"))
    }

    pub type PosixSpawnFn = unsafe extern "C" fn(
        *mut libc::pid_t,
        *const c_char,
        *const libc::posix_spawn_file_actions_t,
        *const libc::posix_spawnattr_t,
        *const *mut c_char,
        *const *mut c_char,
    ) -> c_int;

    pub unsafe fn posix_spawn() -> PosixSpawnFn {
        std::mem::transmute(resolve(c"posix_spawn"))
    }
}

/// Common tail of the exec family: rewrite and delegate to the real execve.
/// Returns only on failure, like the call it replaces.
unsafe fn exec_through_proxy(
    entry_point: &str,
    program: Option<String>,
    argv: Vec<String>,
    env: Vec<String>,
) -> c_int {
    let state = STATE.get();
    let ctx = match state {
        Some(State::Traced(ctx)) => ctx,
        Some(State::ProxyImage) => {
            let argv_c = marshal::to_cstrings(argv);
            let env_c = marshal::to_cstrings(env);
            let argv_ptrs = marshal::as_ptr_array(&argv_c);
            let env_ptrs = marshal::as_ptr_array(&env_c);
            let program_c = match program.and_then(|p| std::ffi::CString::new(p).ok()) {
                Some(p) => p,
                None => {
                    set_errno(libc::ENOENT);
                    return -1;
                }
            };
            return real::execve()(program_c.as_ptr(), argv_ptrs.as_ptr(), env_ptrs.as_ptr());
        }
        _ => return refuse(entry_point),
    };

    let Some(program) = program else {
        set_errno(libc::ENOENT);
        return -1;
    };

    let (new_argv, new_env) = rewritten(ctx, &program, argv, env);
    let argv_c = marshal::to_cstrings(new_argv);
    let env_c = marshal::to_cstrings(new_env);
    let argv_ptrs = marshal::as_ptr_array(&argv_c);
    let env_ptrs = marshal::as_ptr_array(&env_c);
    real::execve()(argv_c[0].as_ptr(), argv_ptrs.as_ptr(), env_ptrs.as_ptr())
}

#[no_mangle]
pub unsafe extern "C" fn execve(
    path: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    let program = marshal::read_string(path);
    let argv = marshal::read_string_array(argv);
    let env = marshal::read_string_array(envp);
    exec_through_proxy("execve", program, argv, env)
}

#[no_mangle]
pub unsafe extern "C" fn execv(path: *const c_char, argv: *const *const c_char) -> c_int {
    let program = marshal::read_string(path);
    let argv = marshal::read_string_array(argv);
    exec_through_proxy("execv", program, argv, current_env())
}

#[no_mangle]
pub unsafe extern "C" fn execvp(file: *const c_char, argv: *const *const c_char) -> c_int {
    let env = current_env();
    let program = marshal::read_string(file)
        .and_then(|name| resolve_program(&name, environ::get(&env, "PATH")));
    let argv = marshal::read_string_array(argv);
    exec_through_proxy("execvp", program, argv, env)
}

#[cfg(target_os = "linux")]
#[no_mangle]
pub unsafe extern "C" fn execvpe(
    file: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    let env = marshal::read_string_array(envp);
    let program = marshal::read_string(file)
        .and_then(|name| resolve_program(&name, environ::get(&env, "PATH")));
    let argv = marshal::read_string_array(argv);
    exec_through_proxy("execvpe", program, argv, env)
}

/// Common tail of the posix_spawn family. Error convention differs from
/// exec: the result is an errno value, and the call returns on success.
unsafe fn spawn_through_proxy(
    entry_point: &str,
    pid: *mut libc::pid_t,
    program: Option<String>,
    file_actions: *const libc::posix_spawn_file_actions_t,
    attrp: *const libc::posix_spawnattr_t,
    argv: Vec<String>,
    env: Vec<String>,
) -> c_int {
    let ctx = match STATE.get() {
        Some(State::Traced(ctx)) => ctx,
        Some(State::ProxyImage) => {
            let argv_c = marshal::to_cstrings(argv);
            let env_c = marshal::to_cstrings(env);
            let argv_ptrs = marshal::as_mut_ptr_array(&argv_c);
            let env_ptrs = marshal::as_mut_ptr_array(&env_c);
            let program_c = match program.and_then(|p| std::ffi::CString::new(p).ok()) {
                Some(p) => p,
                None => return libc::ENOENT,
            };
            return real::posix_spawn()(
                pid,
                program_c.as_ptr(),
                file_actions,
                attrp,
                argv_ptrs.as_ptr(),
                env_ptrs.as_ptr(),
            );
        }
        _ => {
            refuse(entry_point);
            return libc::ENOSYS;
        }
    };

    let Some(program) = program else {
        return libc::ENOENT;
    };

    let (new_argv, new_env) = rewritten(ctx, &program, argv, env);
    let argv_c = marshal::to_cstrings(new_argv);
    let env_c = marshal::to_cstrings(new_env);
    let argv_ptrs = marshal::as_mut_ptr_array(&argv_c);
    let env_ptrs = marshal::as_mut_ptr_array(&env_c);
    real::posix_spawn()(
        pid,
        argv_c[0].as_ptr(),
        file_actions,
        attrp,
        argv_ptrs.as_ptr(),
        env_ptrs.as_ptr(),
    )
}

#[no_mangle]
pub unsafe extern "C" fn posix_spawn(
    pid: *mut libc::pid_t,
    path: *const c_char,
    file_actions: *const libc::posix_spawn_file_actions_t,
    attrp: *const libc::posix_spawnattr_t,
    argv: *const *mut c_char,
    envp: *const *mut c_char,
) -> c_int {
    let program = marshal::read_string(path);
    let argv = marshal::read_string_array(argv as *const *const c_char);
    let env = marshal::read_string_array(envp as *const *const c_char);
    spawn_through_proxy("posix_spawn", pid, program, file_actions, attrp, argv, env)
}

#[no_mangle]
pub unsafe extern "C" fn posix_spawnp(
    pid: *mut libc::pid_t,
    file: *const c_char,
    file_actions: *const libc::posix_spawn_file_actions_t,
    attrp: *const libc::posix_spawnattr_t,
    argv: *const *mut c_char,
    envp: *const *mut c_char,
) -> c_int {
    let env = marshal::read_string_array(envp as *const *const c_char);
    let program = marshal::read_string(file)
        .and_then(|name| resolve_program(&name, environ::get(&env, "PATH")));
    let argv = marshal::read_string_array(argv as *const *const c_char);
    spawn_through_proxy("posix_spawnp", pid, program, file_actions, attrp, argv, env)
}
