//! Runtime helper trampolines: the fixed, addressable entry points the
//! code generator's `CallTarget::Helper`/`Spawn`/`Await` instructions
//! resolve against (spec.md §4.4, §4.11). Every JIT-emitted call to one
//! of these crosses from machine code generated at run time back into
//! ordinary Rust, so each trampoline uses the same packed-`i64`
//! calling convention the native backend pushes arguments in: a
//! `*const i64` argument vector plus an explicit count, a single `i64`
//! return value.
//!
//! These are process-wide singletons (spec.md §9: "initialize exactly
//! once; expose an accessor that lazily constructs under a guard"),
//! reached through [`engine()`] rather than threaded as closures,
//! because the JIT only ever has a bare function address to call —
//! there is no way to smuggle an `&Engine` across that boundary.

use crate::pipeline::Engine;
use parking_lot::RwLock;

static ENGINE: RwLock<Option<&'static Engine>> = RwLock::new(None);

/// Installs the process-wide engine instance. Called once per
/// compile-and-run by [`crate::pipeline::run_file`] before any JIT code
/// that might call a helper is invoked. The engine is intentionally
/// leaked (spec.md §9's "mapped code is intentionally leaked" extends
/// to the registry/scheduler state that code calls back into) rather
/// than torn down, because `-w/--watch` (spec.md §6) re-runs
/// `run_file` — and therefore `install_engine` — once per recompile for
/// the life of the process, and an old engine's leaked machine code may
/// still have in-flight worker threads holding a return address into
/// it when the new one is installed.
pub fn install_engine(engine: Engine) {
    let leaked: &'static Engine = Box::leak(Box::new(engine));
    *ENGINE.write() = Some(leaked);
}

pub fn engine() -> &'static Engine {
    ENGINE
        .read()
        .as_ref()
        .copied()
        .expect("engine installed before any JIT code runs")
}

unsafe fn args_slice(args: *const i64, argc: u32) -> &'static [i64] {
    if argc == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(args, argc as usize)
    }
}

/// `alloc(size, type_id)` (spec.md §4.11). Args: `[size, type_id]`.
pub unsafe extern "C" fn alloc(args: *const i64, argc: u32) -> i64 {
    let a = args_slice(args, argc);
    let ptr = engine()
        .allocator
        .alloc(a[0] as usize, a[1] as u32);
    ptr as i64
}

/// `alloc_array(elem_size, count, type_id)`. Args packed in call order
/// by the lowering pass as `[elem0, elem1, ..., elemN]` for an array
/// literal of `argc` elements, each a boxed 8-byte value — the
/// allocator is asked for `argc` 8-byte slots and every element is
/// copied in.
pub unsafe extern "C" fn alloc_array(args: *const i64, argc: u32) -> i64 {
    let a = args_slice(args, argc);
    let ptr = engine().allocator.alloc_array(8, a.len(), 0) as *mut i64;
    for (i, v) in a.iter().enumerate() {
        ptr.add(i).write(*v);
    }
    ptr as i64
}

/// `array_get(array_ptr, index)`.
pub unsafe extern "C" fn array_get(args: *const i64, argc: u32) -> i64 {
    let a = args_slice(args, argc);
    if a.len() < 2 || a[0] == 0 {
        return 0;
    }
    let ptr = a[0] as *const i64;
    *ptr.add(a[1] as usize)
}

/// `array_set(array_ptr, index, value)`; returns the stored value.
pub unsafe extern "C" fn array_set(args: *const i64, argc: u32) -> i64 {
    let a = args_slice(args, argc);
    if a.len() < 3 || a[0] == 0 {
        return 0;
    }
    let ptr = a[0] as *mut i64;
    ptr.add(a[1] as usize).write(a[2]);
    a[2]
}

/// `write_barrier(obj, field_offset, new_value)`; no-op behind the
/// tracking allocator (spec.md §4.11), but still a real call so a
/// future collector can be substituted without touching codegen.
pub unsafe extern "C" fn write_barrier(args: *const i64, argc: u32) -> i64 {
    let a = args_slice(args, argc);
    if a.len() == 3 {
        engine()
            .allocator
            .write_barrier(a[0] as *mut u8, a[1] as usize, a[2]);
    }
    0
}

/// `safepoint_poll()`; a no-op cooperative collection point (spec.md §9).
pub unsafe extern "C" fn safepoint_poll(_args: *const i64, _argc: u32) -> i64 {
    engine().allocator.safepoint_poll();
    0
}

/// `spawn(func_addr, argc, arg0, arg1, ...)`: installs a new task on the
/// scheduler and returns the id of its result promise packed as an
/// `i64` (spec.md §4.8 `spawn`). The native backend pushes the target
/// function's address and the argument count ahead of the task's own
/// arguments (see `IrInstr::Spawn` in `codegen/native.rs`), so this
/// trampoline unpacks `[func_addr, argc, args...]` rather than the
/// generic `[args...]` shape every other helper uses.
pub unsafe extern "C" fn spawn_task(args: *const i64, argc: u32) -> i64 {
    let a = args_slice(args, argc);
    let func_addr = a[0] as usize;
    let task_argc = a[1] as usize;
    let task_args = a[2..2 + task_argc].to_vec();
    let parent = crate::runtime::current_task();
    let id = engine().scheduler.spawn(func_addr, task_args, parent.as_ref());
    id.0 as i64
}

/// `await(task_id)`: blocks the current task until the named task's
/// promise resolves, returning its resolved value (or `0` on
/// rejection — a full exception/rejection channel back into JIT code
/// is out of scope, see DESIGN.md).
pub unsafe extern "C" fn await_promise(args: *const i64, argc: u32) -> i64 {
    let a = args_slice(args, argc);
    let task_id = crate::runtime::TaskId(a[0] as u64);
    let task = match engine().scheduler.get_task(task_id) {
        Some(t) => t,
        None => return 0,
    };
    match engine().scheduler.await_task(&task) {
        crate::runtime::Outcome::Resolved(v) => v,
        crate::runtime::Outcome::Rejected(_) => 0,
    }
}

/// `resolve(promise_task_id, value)`: resolves the calling task's own
/// result promise early from within its body (used by explicit
/// `Promise`-returning library calls rather than the implicit
/// resolve-on-return every spawned task gets for free).
pub unsafe extern "C" fn resolve_promise(args: *const i64, argc: u32) -> i64 {
    let a = args_slice(args, argc);
    if let Some(task) = crate::runtime::current_task() {
        task.result.resolve(crate::runtime::Outcome::Resolved(a[0]));
    }
    a.get(0).copied().unwrap_or(0)
}

/// `string_concat(a, b)`: both operands are interned-string ids (see
/// [`crate::pipeline::Engine::intern`]); returns the id of the
/// concatenation, interning it if not already seen.
pub unsafe extern "C" fn string_concat(args: *const i64, argc: u32) -> i64 {
    let a = args_slice(args, argc);
    let left = engine().resolve_string(a[0]);
    let right = engine().resolve_string(a[1]);
    engine().intern(format!("{left}{right}"))
}

/// `pow(base, exp)`; both operands arrive as raw `f64` bit patterns per
/// the lowering pass's cast-up-to-float64 rule for `**` (spec.md §4.3).
pub unsafe extern "C" fn pow(args: *const i64, argc: u32) -> i64 {
    let a = args_slice(args, argc);
    let base = f64::from_bits(a[0] as u64);
    let exp = f64::from_bits(a[1] as u64);
    base.powf(exp).to_bits() as i64
}

/// `setTimeout`/`setInterval` lower to this one helper (spec.md §4.8,
/// §6). Args: `[callback_addr, delay_ms, is_interval]`. Registers the
/// timer against the calling task and returns its id, or `-1` if
/// called outside a task (mirrors `cancel_timer`'s no-current-task
/// no-op rather than panicking).
pub unsafe extern "C" fn set_timer(args: *const i64, argc: u32) -> i64 {
    let a = args_slice(args, argc);
    let callback_addr = a[0] as usize;
    let delay_ms = a[1].max(0) as u64;
    let is_interval = a[2] != 0;
    let deadline = std::time::Instant::now() + std::time::Duration::from_millis(delay_ms);
    let interval = std::time::Duration::from_millis(delay_ms);
    match engine()
        .scheduler
        .set_timer(deadline, callback_addr, is_interval, interval)
    {
        Some(id) => id as i64,
        None => -1,
    }
}

/// `clearTimeout`/`clearInterval` (spec.md §4.8, §6). Args: `[timer_id]`.
pub unsafe extern "C" fn cancel_timer(args: *const i64, argc: u32) -> i64 {
    let a = args_slice(args, argc);
    engine().scheduler.cancel_timer(a[0] as u64);
    0
}

/// `a == b` when either operand is statically `any` (spec.md §4.3).
/// This engine carries no runtime type tag alongside an `any` value
/// (every value, typed or not, is the same packed `i64` — see
/// DESIGN.md's open item on `any` representation), so today this
/// reduces to the same bitwise comparison the typed fast path performs
/// inline; the helper indirection exists so the two switch forms
/// Scenario E distinguishes really do take different codegen paths,
/// and so a future tagged `any` representation only needs to change
/// this one function.
pub unsafe extern "C" fn runtime_equals(args: *const i64, argc: u32) -> i64 {
    let a = args_slice(args, argc);
    (a[0] == a[1]) as i64
}

/// Per-argument type tag `lower_call`'s console-log lowering packs
/// alongside each value, so this helper can render a `float64` bit
/// pattern and an interned string id as themselves instead of as a raw
/// `i64` (spec.md §6: "the host's default decimal representation").
pub const CONSOLE_TAG_DEFAULT: i64 = 0;
pub const CONSOLE_TAG_FLOAT: i64 = 1;
pub const CONSOLE_TAG_STRING: i64 = 2;

/// `console.log/warn/error(...)` (spec.md §6 console contract). Args are
/// packed by the lowering pass as `(value, tag)` pairs — `argc` is
/// always even — rather than bare values, so each argument's static
/// type (known at the call site from `Expr::inferred_ty`) survives the
/// helper-call boundary. Arrays and objects still print as their packed
/// `i64`/elements per the console contract's own "no fixed byte-level
/// format" allowance.
pub unsafe extern "C" fn console_log(args: *const i64, argc: u32) -> i64 {
    let a = args_slice(args, argc);
    let rendered: Vec<String> = a
        .chunks_exact(2)
        .map(|pair| {
            let (value, tag) = (pair[0], pair[1]);
            match tag {
                CONSOLE_TAG_FLOAT => format_host_float(f64::from_bits(value as u64)),
                CONSOLE_TAG_STRING => engine().resolve_string(value),
                _ => value.to_string(),
            }
        })
        .collect();
    println!("{}", rendered.join(","));
    0
}

/// The host's default decimal representation for a float: an integral
/// value prints with no fractional part (`"5"`, not `"5.0"`), matching
/// the common scripting-language console convention spec.md §6 points
/// at; any other value uses Rust's shortest round-tripping `Display`.
fn format_host_float(v: f64) -> String {
    if v.fract() == 0.0 && v.is_finite() {
        format!("{v:.0}")
    } else {
        v.to_string()
    }
}
