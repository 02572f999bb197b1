//! Command-line parsing.
//!
//! GCC-style flags are parsed with a hand-rolled left-to-right loop: the
//! single-dash long options (`-fpic`, `-iquote`, `-std=c11`) and attached
//! argument forms (`-Idir`, `-DNAME=1`) don't fit declarative option
//! parsers, so this stays explicit.

use crate::common::error::DriverError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdVer {
    None,
    C99,
    C11,
    C17,
    C23,
}

impl StdVer {
    /// The value `__STDC_VERSION__` expands to.
    pub fn stdc_version(self) -> &'static str {
        match self {
            StdVer::C99 => "199901L",
            StdVer::C11 => "201112L",
            StdVer::C23 => "202311L",
            _ => "201710L",
        }
    }
}

#[derive(Debug)]
pub struct Options {
    pub include_paths: Vec<String>,
    pub iquote_paths: Vec<String>,
    pub idirafter_paths: Vec<String>,
    /// `-D NAME[=VALUE]`, applied in order before `-U`.
    pub defines: Vec<(String, String)>,
    pub undefs: Vec<String>,
    /// `-include FILE`, spliced in before the main file.
    pub includes: Vec<String>,
    pub opt_e: bool,
    pub opt_s: bool,
    pub opt_c: bool,
    pub opt_fpic: bool,
    pub opt_fcommon: bool,
    pub opt_func_sections: bool,
    pub opt_data_sections: bool,
    pub std: StdVer,
    pub output: Option<String>,
    pub inputs: Vec<String>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            include_paths: Vec::new(),
            iquote_paths: Vec::new(),
            idirafter_paths: Vec::new(),
            defines: Vec::new(),
            undefs: Vec::new(),
            includes: Vec::new(),
            opt_e: false,
            opt_s: false,
            opt_c: false,
            opt_fpic: false,
            opt_fcommon: true,
            opt_func_sections: false,
            opt_data_sections: false,
            std: StdVer::None,
            output: None,
            inputs: Vec::new(),
        }
    }
}

fn usage() -> String {
    "usage: rycc [ -o <path> ] <file>...".to_string()
}

/// Parse `args` (excluding argv[0]). An option that takes a value accepts
/// both the separated (`-I dir`) and attached (`-Idir`) spellings.
pub fn parse_args(args: &[String]) -> Result<Options, DriverError> {
    let mut opts = Options::default();
    let mut i = 0;

    // A value argument, either attached to the flag or the next argv entry.
    let take = |args: &[String], i: &mut usize, flag: &str| -> Result<String, DriverError> {
        let arg = &args[*i];
        if arg.len() > flag.len() {
            return Ok(arg[flag.len()..].to_string());
        }
        *i += 1;
        args.get(*i)
            .cloned()
            .ok_or_else(|| DriverError::Usage(format!("argument to '{}' is missing", flag)))
    };

    while i < args.len() {
        let arg = args[i].clone();
        match arg.as_str() {
            "--help" => return Err(DriverError::Usage(usage())),
            "-E" => opts.opt_e = true,
            "-S" => opts.opt_s = true,
            "-c" => opts.opt_c = true,
            "-fpic" | "-fPIC" => opts.opt_fpic = true,
            "-fno-pic" | "-fno-PIC" => opts.opt_fpic = false,
            "-fcommon" => opts.opt_fcommon = true,
            "-fno-common" => opts.opt_fcommon = false,
            "-ffunction-sections" => opts.opt_func_sections = true,
            "-fdata-sections" => opts.opt_data_sections = true,
            "-iquote" => {
                let v = take(args, &mut i, "-iquote")?;
                opts.iquote_paths.push(v);
            }
            "-idirafter" => {
                let v = take(args, &mut i, "-idirafter")?;
                opts.idirafter_paths.push(v);
            }
            "-include" => {
                let v = take(args, &mut i, "-include")?;
                opts.includes.push(v);
            }
            _ if arg == "-o" || arg.starts_with("-o") => {
                opts.output = Some(take(args, &mut i, "-o")?);
            }
            _ if arg == "-I" || arg.starts_with("-I") => {
                let v = take(args, &mut i, "-I")?;
                opts.include_paths.push(v);
            }
            _ if arg == "-D" || arg.starts_with("-D") => {
                let v = take(args, &mut i, "-D")?;
                let (name, val) = match v.split_once('=') {
                    Some((n, v)) => (n.to_string(), v.to_string()),
                    None => (v, "1".to_string()),
                };
                opts.defines.push((name, val));
            }
            _ if arg == "-U" || arg.starts_with("-U") => {
                let v = take(args, &mut i, "-U")?;
                opts.undefs.push(v);
            }
            _ if arg.starts_with("-std=") => {
                opts.std = match &arg[5..] {
                    "c99" | "gnu99" => StdVer::C99,
                    "c11" | "gnu11" => StdVer::C11,
                    "c17" | "gnu17" => StdVer::C17,
                    "c23" | "gnu23" => StdVer::C23,
                    other => {
                        return Err(DriverError::Usage(format!("unknown std: {}", other)));
                    }
                };
            }
            // Accepted and ignored, for build-system compatibility.
            "-g" | "-O0" | "-O1" | "-O2" | "-O3" | "-Os" | "-w" | "-pipe" | "-static" => {}
            _ if arg.starts_with("-W") || arg.starts_with("-g") => {}
            _ if arg.starts_with('-') && arg.len() > 1 => {
                return Err(DriverError::Usage(format!("unknown argument: {}", arg)));
            }
            _ => opts.inputs.push(arg),
        }
        i += 1;
    }

    if opts.inputs.is_empty() {
        return Err(DriverError::Usage("no input files".to_string()));
    }
    Ok(opts)
}

/// Default system search paths, appended after the user's `-I` entries.
pub fn add_default_include_paths(opts: &mut Options) {
    for dir in [
        "/usr/local/include",
        "/usr/include/x86_64-linux-gnu",
        "/usr/include",
    ] {
        if std::path::Path::new(dir).is_dir() {
            opts.include_paths.push(dir.to_string());
        }
    }
    let extra = std::mem::take(&mut opts.idirafter_paths);
    opts.include_paths.extend(extra);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn basic_flags() {
        let o = parse_args(&v(&["-S", "-o", "out.s", "foo.c"])).unwrap();
        assert!(o.opt_s);
        assert_eq!(o.output.as_deref(), Some("out.s"));
        assert_eq!(o.inputs, ["foo.c"]);
    }

    #[test]
    fn attached_values() {
        let o = parse_args(&v(&["-Iinc", "-DX=2", "-DY", "foo.c"])).unwrap();
        assert_eq!(o.include_paths, ["inc"]);
        assert_eq!(
            o.defines,
            [("X".to_string(), "2".to_string()), ("Y".to_string(), "1".to_string())]
        );
    }

    #[test]
    fn std_selection() {
        let o = parse_args(&v(&["-std=c11", "x.c"])).unwrap();
        assert_eq!(o.std, StdVer::C11);
        assert_eq!(o.std.stdc_version(), "201112L");
    }

    #[test]
    fn rejects_unknown() {
        assert!(parse_args(&v(&["-q", "x.c"])).is_err());
        assert!(parse_args(&v(&[])).is_err());
    }
}
