// Language profiles: static per-language rows plus the template expansion
// that turns a row into judger arguments for one working directory.

use crate::error::ProfileError;
use crate::sandbox::{ExecArgs, ExecutionLimits, UNLIMITED};
use gavel_common::types::Language;
use std::path::{Path, PathBuf};

pub const COMPILE_OUT_FILE: &str = "compile.out";
pub const COMPILE_LOG_FILE: &str = "compile.log";
pub const RUN_LOG_FILE: &str = "run.log";

const MAX_STACK: i64 = 128 * 1024 * 1024;
const MAX_COMPILE_OUTPUT: i64 = 20 * 1024 * 1024;
const MAX_RUN_OUTPUT: i64 = 10 * 1024 * 1024;

/// Outside the judger's accepted id range, so no `--uid`/`--gid` is sent.
const INHERIT_ID: i64 = -1;

const DEFAULT_ENV: &[&str] = &["LANG=en_US.UTF-8", "LANGUAGE=en_US:en", "LC_ALL=en_US.UTF-8"];
const PYTHON_ENV: &[&str] = &[
    "LANG=en_US.UTF-8",
    "LANGUAGE=en_US:en",
    "LC_ALL=en_US.UTF-8",
    "PYTHONIOENCODING=utf-8",
];

/// Static description of how to build and run one language.
///
/// Templates are whitespace-separated argument lists. Recognized
/// placeholders are `{srcPath}`, `{exePath}`, `{exeDir}`, `{maxMemory}`
/// (kilobytes) and `{policyPath}`; anything else in braces is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanguageProfile {
    pub language: Language,
    pub src_name: &'static str,
    pub exe_name: &'static str,
    pub max_compile_cpu_time: i64,
    pub max_compile_real_time: i64,
    pub max_compile_memory: i64,
    pub compiler_path: &'static str,
    pub compile_args: &'static str,
    pub run_command: &'static str,
    pub run_args: &'static str,
    pub seccomp_rule: Option<&'static str>,
    /// Measure memory instead of capping it, for runtimes that reserve far
    /// more address space than they use.
    pub memory_limit_check_only: bool,
    pub env: &'static [&'static str],
}

pub static PROFILES: [LanguageProfile; 4] = [
    LanguageProfile {
        language: Language::C,
        src_name: "main.c",
        exe_name: "main",
        max_compile_cpu_time: 3000,
        max_compile_real_time: 10000,
        max_compile_memory: 256 * 1024 * 1024,
        compiler_path: "/usr/bin/gcc",
        compile_args: "-DONLINE_JUDGE -O2 -Wall -Werror=implicit-function-declaration -std=c11 {srcPath} -lm -o {exePath}",
        run_command: "{exePath}",
        run_args: "",
        seccomp_rule: Some("c_cpp"),
        memory_limit_check_only: false,
        env: DEFAULT_ENV,
    },
    LanguageProfile {
        language: Language::Cpp,
        src_name: "main.cpp",
        exe_name: "main",
        max_compile_cpu_time: 10000,
        max_compile_real_time: 20000,
        max_compile_memory: 1024 * 1024 * 1024,
        compiler_path: "/usr/bin/g++",
        compile_args: "-DONLINE_JUDGE -O2 -Wall -Werror=implicit-function-declaration -std=c++14 {srcPath} -lm -o {exePath}",
        run_command: "{exePath}",
        run_args: "",
        seccomp_rule: Some("c_cpp"),
        memory_limit_check_only: false,
        env: DEFAULT_ENV,
    },
    LanguageProfile {
        language: Language::Java,
        src_name: "Main.java",
        exe_name: "Main",
        max_compile_cpu_time: 5000,
        max_compile_real_time: 10000,
        max_compile_memory: UNLIMITED,
        compiler_path: "/usr/bin/javac",
        compile_args: "{srcPath} -d {exeDir} -encoding UTF8",
        run_command: "/usr/bin/java",
        run_args: "-cp {exeDir} -XX:MaxRAM={maxMemory}k -Djava.security.manager -Dfile.encoding=UTF-8 -Djava.security.policy=={policyPath} -Djava.awt.headless=true Main",
        seccomp_rule: None,
        memory_limit_check_only: true,
        env: DEFAULT_ENV,
    },
    LanguageProfile {
        language: Language::Python3,
        src_name: "solution.py",
        // py_compile names the artifact after the interpreter version; keep
        // in step with the python3 shipped in the worker image.
        exe_name: "__pycache__/solution.cpython-312.pyc",
        max_compile_cpu_time: 3000,
        max_compile_real_time: 10000,
        max_compile_memory: 128 * 1024 * 1024,
        compiler_path: "/usr/bin/python3",
        compile_args: "-m py_compile {srcPath}",
        run_command: "/usr/bin/python3",
        run_args: "{exePath}",
        seccomp_rule: Some("general"),
        memory_limit_check_only: false,
        env: PYTHON_ENV,
    },
];

impl LanguageProfile {
    pub fn of(language: Language) -> &'static LanguageProfile {
        match language {
            Language::C => &PROFILES[0],
            Language::Cpp => &PROFILES[1],
            Language::Java => &PROFILES[2],
            Language::Python3 => &PROFILES[3],
        }
    }

    /// Look a profile up by wire tag.
    pub fn resolve(tag: &str) -> Result<&'static LanguageProfile, ProfileError> {
        PROFILES
            .iter()
            .find(|profile| profile.language.as_str() == tag)
            .ok_or_else(|| ProfileError::UnsupportedLanguage(tag.to_string()))
    }
}

/// Host-specific settings applied on top of the static profiles.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    log_dir: PathBuf,
    java_policy_path: PathBuf,
    uid: i64,
    gid: i64,
}

impl ProfileRegistry {
    pub fn new(log_dir: impl Into<PathBuf>, java_policy_path: impl Into<PathBuf>, uid: i64, gid: i64) -> Self {
        Self {
            log_dir: log_dir.into(),
            java_policy_path: java_policy_path.into(),
            uid,
            gid,
        }
    }

    pub fn source_path(&self, dir: &Path, language: Language) -> PathBuf {
        dir.join(LanguageProfile::of(language).src_name)
    }

    pub fn artifact_path(&self, dir: &Path, language: Language) -> PathBuf {
        dir.join(LanguageProfile::of(language).exe_name)
    }

    pub fn compile_output_path(&self, dir: &Path) -> PathBuf {
        dir.join(COMPILE_OUT_FILE)
    }

    pub fn compile_log_path(&self) -> PathBuf {
        self.log_dir.join(COMPILE_LOG_FILE)
    }

    pub fn run_log_path(&self) -> PathBuf {
        self.log_dir.join(RUN_LOG_FILE)
    }

    pub fn run_output_path(&self, dir: &Path, order: usize) -> PathBuf {
        dir.join(format!("{}.out", order))
    }

    pub fn run_error_path(&self, dir: &Path, order: usize) -> PathBuf {
        dir.join(format!("{}.error", order))
    }

    /// Judger arguments that compile the staged source in `dir`.
    ///
    /// Compilation runs as the judger's own user since the compiler has to
    /// write the artifact into the working directory.
    pub fn compile_args(&self, dir: &Path, language: Language) -> Result<ExecArgs, ProfileError> {
        let profile = LanguageProfile::of(language);
        let output_path = self.compile_output_path(dir);
        let vars = self.template_vars(dir, profile, None);

        Ok(ExecArgs {
            max_cpu_time: profile.max_compile_cpu_time,
            max_real_time: profile.max_compile_real_time,
            max_memory: profile.max_compile_memory,
            max_stack: MAX_STACK,
            max_output_size: MAX_COMPILE_OUTPUT,
            uid: INHERIT_ID,
            gid: INHERIT_ID,
            exe_path: profile.compiler_path.into(),
            input_path: None,
            output_path: Some(output_path.clone()),
            error_path: Some(output_path),
            log_path: Some(self.compile_log_path()),
            seccomp_rule_name: None,
            memory_limit_check_only: false,
            args: expand(profile.compile_args, &vars)?,
            env: profile.env.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Judger arguments that run the compiled artifact for test `order`.
    pub fn run_args(
        &self,
        dir: &Path,
        language: Language,
        order: usize,
        limits: &ExecutionLimits,
    ) -> Result<ExecArgs, ProfileError> {
        let profile = LanguageProfile::of(language);
        let vars = self.template_vars(dir, profile, Some(limits));

        let mut exe = expand(profile.run_command, &vars)?;
        if exe.len() != 1 {
            return Err(ProfileError::UnresolvedPlaceholder {
                template: profile.run_command.to_string(),
                placeholder: "<single executable>".to_string(),
            });
        }

        Ok(ExecArgs {
            max_cpu_time: limits.cpu_time_ms,
            max_real_time: limits.real_time_ms,
            max_memory: limits.memory_bytes(),
            max_stack: MAX_STACK,
            max_output_size: MAX_RUN_OUTPUT,
            uid: self.uid,
            gid: self.gid,
            exe_path: exe.remove(0).into(),
            input_path: None,
            output_path: Some(self.run_output_path(dir, order)),
            error_path: Some(self.run_error_path(dir, order)),
            log_path: Some(self.run_log_path()),
            seccomp_rule_name: profile.seccomp_rule.map(str::to_string),
            memory_limit_check_only: profile.memory_limit_check_only,
            args: expand(profile.run_args, &vars)?,
            env: profile.env.iter().map(|s| s.to_string()).collect(),
        })
    }

    fn template_vars(
        &self,
        dir: &Path,
        profile: &LanguageProfile,
        limits: Option<&ExecutionLimits>,
    ) -> Vec<(&'static str, String)> {
        let mut vars = vec![
            ("srcPath", dir.join(profile.src_name).display().to_string()),
            ("exePath", dir.join(profile.exe_name).display().to_string()),
            ("exeDir", dir.display().to_string()),
            ("policyPath", self.java_policy_path.display().to_string()),
        ];
        if let Some(limits) = limits {
            vars.push(("maxMemory", limits.memory_kb.to_string()));
        }
        vars
    }
}

/// Split `template` into arguments and substitute every `{name}`.
/// Substitution is per argument, so a path containing spaces stays one
/// argument.
pub fn expand(template: &str, vars: &[(&str, String)]) -> Result<Vec<String>, ProfileError> {
    template
        .split_whitespace()
        .map(|token| {
            let mut arg = token.to_string();
            for (name, value) in vars {
                arg = arg.replace(&format!("{{{}}}", name), value);
            }
            match find_placeholder(&arg) {
                Some(placeholder) => Err(ProfileError::UnresolvedPlaceholder {
                    template: template.to_string(),
                    placeholder: placeholder.to_string(),
                }),
                None => Ok(arg),
            }
        })
        .collect()
}

fn find_placeholder(arg: &str) -> Option<&str> {
    let mut rest = arg;
    while let Some(start) = rest.find('{') {
        let tail = &rest[start..];
        if let Some(end) = tail.find('}') {
            let name = &tail[1..end];
            if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Some(&tail[..=end]);
            }
        }
        rest = &tail[1..];
    }
    None
}
