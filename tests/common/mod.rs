//! Assembles the small x86-64/AArch64 fixture binary the scenario tests run against.
//!
//! There's no prebuilt "ASM_TESTS_EXEC" artifact to check in — a real one is a compiled
//! ELF, and a grading harness's whole job is to run binaries produced by the local
//! assembler/linker, so building one here with `as`/`ld` at test time is the faithful
//! equivalent of how the original test suite got its own fixture binary. One combined
//! binary serves every scenario, matching the original test suite's ASM_TESTS_EXEC being
//! shared across `test_program.cpp`, `test_subprocess.cpp`, and `test_symbol_reader.cpp`.

use std::path::PathBuf;
use std::process::Command;
use std::sync::OnceLock;

#[cfg(target_arch = "x86_64")]
const ASM_SOURCE: &str = r#"
.intel_syntax noprefix
.global _start
.global sum
.global sum_and_write
.global timeout_fn
.global segfaulting_fn
.global exiting_fn

.section .rodata
strHello:
    .asciz "Hello, from assembly!\n"
strGoodbye:
    .asciz "Goodbye, from assembly!\n"

.section .text

_start:
    mov rax, 1
    mov rdi, 1
    lea rsi, [rip + strHello]
    mov rdx, 23
    syscall

    mov rax, 60
    mov rdi, 42
    syscall

sum:
    mov rax, rdi
    add rax, rsi
    ret

sum_and_write:
    add rdi, rsi
    mov r8b, dil
    xor rax, rax
    push rax
    mov [rsp], r8b
    mov rax, 1
    mov rdi, 1
    mov rsi, rsp
    mov rdx, 8
    syscall
    pop rax
    ret

timeout_fn:
    jmp timeout_fn

segfaulting_fn:
    xor rax, rax
    mov [rax], rax
    ret

exiting_fn:
    mov rax, 60
    syscall
    ret
"#;

#[cfg(target_arch = "aarch64")]
const ASM_SOURCE: &str = r#"
.global _start
.global sum
.global sum_and_write
.global timeout_fn
.global segfaulting_fn
.global exiting_fn

.section .rodata
strHello:
    .asciz "Hello, from assembly!\n"
strGoodbye:
    .asciz "Goodbye, from assembly!\n"

.section .text

_start:
    mov x8, #64
    mov x0, #1
    adr x1, strHello
    mov x2, #23
    svc #0

    mov x8, #93
    mov x0, #42
    svc #0

sum:
    add x0, x0, x1
    ret

sum_and_write:
    add x0, x0, x1
    sub sp, sp, #16
    mov x3, #0
    str x3, [sp]
    strb w0, [sp]
    mov x1, sp
    mov x0, #1
    mov x2, #8
    mov x8, #64
    svc #0
    add sp, sp, #16
    ret

timeout_fn:
    b timeout_fn

segfaulting_fn:
    mov x0, #0
    str x0, [x0]
    ret

exiting_fn:
    mov x8, #93
    svc #0
    ret
"#;

/// Assembles and links [`ASM_SOURCE`] once per test process, returning the path to the
/// resulting executable. Panics (with the assembler/linker's stderr) if either step fails —
/// there's no sensible fallback for a fixture the rest of the suite can't run without.
pub fn asm_tests_exec() -> PathBuf {
    static PATH: OnceLock<PathBuf> = OnceLock::new();
    PATH.get_or_init(build).clone()
}

fn build() -> PathBuf {
    let _ = env_logger::try_init();

    let dir = std::env::temp_dir().join(format!("asmgrader-fixture-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("create fixture scratch dir");

    let src_path = dir.join("fixture.s");
    std::fs::write(&src_path, ASM_SOURCE).expect("write fixture assembly source");

    let obj_path = dir.join("fixture.o");
    let as_status = Command::new("as")
        .arg("-o")
        .arg(&obj_path)
        .arg(&src_path)
        .status()
        .expect("run `as`; is binutils installed?");
    assert!(as_status.success(), "`as` failed to assemble the fixture");

    let exe_path = dir.join("fixture");
    let ld_status = Command::new("ld")
        .arg("-static")
        .arg("-e")
        .arg("_start")
        .arg("-o")
        .arg(&exe_path)
        .arg(&obj_path)
        .status()
        .expect("run `ld`; is binutils installed?");
    assert!(ld_status.success(), "`ld` failed to link the fixture");

    exe_path
}
