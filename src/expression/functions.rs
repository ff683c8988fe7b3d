//! Built-in expression functions and their declared side-effect safety.

use std::fs;

use regex::Regex;

use super::{EvalEnv, Value};
use crate::error::{Error, Result};

/// Whether a function may be folded during constant simplification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Safety {
    /// Always safe to evaluate during simplification.
    Safe,
    /// Safe only outside an Unknown-at-parse-time conditional block.
    ConditionalUnsafe,
    /// Never foldable (depends on assembler state that only exists at
    /// validate/encode time, e.g. the current output position).
    Unsafe,
}

struct FunctionDef {
    name: &'static str,
    min_arity: usize,
    max_arity: usize,
    safety: Safety,
}

const FUNCTIONS: &[FunctionDef] = &[
    FunctionDef { name: "version", min_arity: 0, max_arity: 0, safety: Safety::Safe },
    FunctionDef { name: "endianness", min_arity: 0, max_arity: 0, safety: Safety::Unsafe },
    FunctionDef { name: "outputname", min_arity: 0, max_arity: 0, safety: Safety::Unsafe },
    FunctionDef { name: "org", min_arity: 0, max_arity: 0, safety: Safety::Unsafe },
    FunctionDef { name: "orga", min_arity: 0, max_arity: 0, safety: Safety::Unsafe },
    FunctionDef { name: "headersize", min_arity: 0, max_arity: 0, safety: Safety::Unsafe },
    FunctionDef { name: "fileexists", min_arity: 1, max_arity: 1, safety: Safety::Safe },
    FunctionDef { name: "filesize", min_arity: 1, max_arity: 1, safety: Safety::ConditionalUnsafe },
    FunctionDef { name: "tostring", min_arity: 1, max_arity: 1, safety: Safety::Safe },
    FunctionDef { name: "tohex", min_arity: 1, max_arity: 2, safety: Safety::Safe },
    FunctionDef { name: "int", min_arity: 1, max_arity: 1, safety: Safety::Safe },
    FunctionDef { name: "float", min_arity: 1, max_arity: 1, safety: Safety::Safe },
    FunctionDef { name: "frac", min_arity: 1, max_arity: 1, safety: Safety::Safe },
    FunctionDef { name: "abs", min_arity: 1, max_arity: 1, safety: Safety::Safe },
    FunctionDef { name: "round", min_arity: 1, max_arity: 1, safety: Safety::Safe },
    FunctionDef { name: "strlen", min_arity: 1, max_arity: 1, safety: Safety::Safe },
    FunctionDef { name: "substr", min_arity: 2, max_arity: 3, safety: Safety::Safe },
    FunctionDef { name: "find", min_arity: 2, max_arity: 3, safety: Safety::Safe },
    FunctionDef { name: "rfind", min_arity: 2, max_arity: 3, safety: Safety::Safe },
    FunctionDef { name: "readbyte", min_arity: 1, max_arity: 2, safety: Safety::ConditionalUnsafe },
    FunctionDef { name: "readu8", min_arity: 1, max_arity: 2, safety: Safety::ConditionalUnsafe },
    FunctionDef { name: "reads8", min_arity: 1, max_arity: 2, safety: Safety::ConditionalUnsafe },
    FunctionDef { name: "readu16", min_arity: 1, max_arity: 2, safety: Safety::ConditionalUnsafe },
    FunctionDef { name: "reads16", min_arity: 1, max_arity: 2, safety: Safety::ConditionalUnsafe },
    FunctionDef { name: "readu32", min_arity: 1, max_arity: 2, safety: Safety::ConditionalUnsafe },
    FunctionDef { name: "reads32", min_arity: 1, max_arity: 2, safety: Safety::ConditionalUnsafe },
    FunctionDef { name: "readu64", min_arity: 1, max_arity: 2, safety: Safety::ConditionalUnsafe },
    FunctionDef { name: "reads64", min_arity: 1, max_arity: 2, safety: Safety::ConditionalUnsafe },
    FunctionDef { name: "readascii", min_arity: 1, max_arity: 3, safety: Safety::ConditionalUnsafe },
    FunctionDef { name: "lo", min_arity: 1, max_arity: 1, safety: Safety::Safe },
    FunctionDef { name: "hi", min_arity: 1, max_arity: 1, safety: Safety::Safe },
    FunctionDef { name: "isarm", min_arity: 0, max_arity: 0, safety: Safety::Safe },
    FunctionDef { name: "isthumb", min_arity: 0, max_arity: 0, safety: Safety::Safe },
    FunctionDef { name: "defined", min_arity: 1, max_arity: 1, safety: Safety::Safe },
    FunctionDef { name: "regex_match", min_arity: 2, max_arity: 2, safety: Safety::Safe },
    FunctionDef { name: "regex_search", min_arity: 2, max_arity: 2, safety: Safety::Safe },
    FunctionDef { name: "regex_extract", min_arity: 2, max_arity: 3, safety: Safety::Safe },
];

fn lookup(name: &str) -> Option<&'static FunctionDef> {
    FUNCTIONS.iter().find(|f| f.name.eq_ignore_ascii_case(name))
}

pub fn safety_of(name: &str) -> Option<Safety> {
    lookup(name).map(|f| f.safety)
}

pub fn exists(name: &str) -> bool {
    lookup(name).is_some()
}

/// `hi()`'s carry-aware complement to `lo()`, so a `lui`/`addiu` (or
/// `ldr`/`add`) pair reconstructs a 32-bit immediate even when the low 16
/// bits are negative as a signed halfword.
pub fn hi(value: i64) -> i64 {
    let v = value as i32 as u32;
    let low = v & 0xFFFF;
    let carry = if low & 0x8000 != 0 { 1 } else { 0 };
    (((v >> 16) + carry) & 0xFFFF) as i64
}

/// `lo()`: sign-extends the low 16 bits of `value`.
pub fn lo(value: i64) -> i64 {
    let v = value as i32 as u32;
    let low = (v & 0xFFFF) as i16;
    low as i64
}

pub fn call(name: &str, args: &[Value], env: &EvalEnv) -> Result<Value> {
    let def = lookup(name).ok_or_else(|| Error::UnknownDirective { name: name.to_string() })?;
    if args.len() < def.min_arity || args.len() > def.max_arity {
        return Err(Error::InvalidArgumentCount { found: args.len(), expected: (def.min_arity..=def.max_arity).collect() });
    }
    let lower = name.to_ascii_lowercase();
    Ok(match lower.as_str() {
        "version" => Value::Integer(0),
        "endianness" => Value::Str(env.endianness_name.to_string()),
        "outputname" => Value::Str(env.output_name.clone()),
        "org" => Value::Integer(env.memory_pos),
        "orga" => Value::Integer(env.orga),
        "headersize" => Value::Integer(env.headersize),
        "fileexists" => Value::Integer(file_path(env, &args[0]).is_file() as i64),
        "filesize" => match fs::metadata(file_path(env, &args[0])) {
            Ok(meta) => Value::Integer(meta.len() as i64),
            Err(_) => Value::Str("undef".to_string()),
        },
        "tostring" => Value::Str(stringify(&args[0])),
        "tohex" => {
            let v = args[0].as_i64().unwrap_or(0);
            let digits = args.get(1).and_then(|a| a.as_i64()).unwrap_or(0).max(0) as usize;
            let hex = format!("{:X}", v);
            Value::Str(format!("{:0>width$}", hex, width = digits))
        }
        "int" => Value::Integer(args[0].as_i64().unwrap_or(0)),
        "float" => Value::Float(args[0].as_f64().unwrap_or(0.0)),
        "frac" => Value::Float(args[0].as_f64().unwrap_or(0.0).fract()),
        "abs" => match &args[0] {
            Value::Integer(v) => Value::Integer(v.abs()),
            other => Value::Float(other.as_f64().unwrap_or(0.0).abs()),
        },
        "round" => Value::Integer(args[0].as_f64().unwrap_or(0.0).round() as i64),
        "strlen" => Value::Integer(stringify(&args[0]).chars().count() as i64),
        "substr" => {
            let s = stringify(&args[0]);
            let chars: Vec<char> = s.chars().collect();
            let start = args[1].as_i64().unwrap_or(0).max(0) as usize;
            let len = args.get(2).and_then(|a| a.as_i64()).map(|n| n.max(0) as usize).unwrap_or(chars.len().saturating_sub(start));
            let end = (start + len).min(chars.len());
            let start = start.min(chars.len());
            Value::Str(chars[start..end].iter().collect())
        }
        "find" | "rfind" => {
            let haystack = stringify(&args[0]);
            let needle = stringify(&args[1]);
            let start = args.get(2).and_then(|a| a.as_i64()).unwrap_or(0).max(0) as usize;
            let found = if lower == "find" {
                haystack.get(start..).and_then(|s| s.find(&needle)).map(|i| i + start)
            } else {
                haystack.rfind(&needle)
            };
            match found {
                Some(i) => Value::Integer(i as i64),
                None => Value::Integer(-1),
            }
        }
        "readbyte" | "readu8" => read_int(env, args, 1, false),
        "reads8" => read_int(env, args, 1, true),
        "readu16" => read_int(env, args, 2, false),
        "reads16" => read_int(env, args, 2, true),
        "readu32" => read_int(env, args, 4, false),
        "reads32" => read_int(env, args, 4, true),
        "readu64" | "reads64" => read_int(env, args, 8, false),
        "readascii" => {
            let path = file_path(env, &args[0]);
            let offset = args.get(1).and_then(|a| a.as_i64()).unwrap_or(0).max(0) as usize;
            let len = args.get(2).and_then(|a| a.as_i64()).map(|n| n.max(0) as usize);
            match fs::read(&path) {
                Ok(bytes) => {
                    let end = len.map(|l| (offset + l).min(bytes.len())).unwrap_or(bytes.len());
                    let slice = bytes.get(offset..end).unwrap_or(&[]);
                    Value::Str(String::from_utf8_lossy(slice).into_owned())
                }
                Err(_) => Value::Str("undef".to_string()),
            }
        }
        "lo" => Value::Integer(lo(args[0].as_i64().unwrap_or(0))),
        "hi" => Value::Integer(hi(args[0].as_i64().unwrap_or(0))),
        "isarm" => Value::Integer((env.is_arm && !env.is_thumb) as i64),
        "isthumb" => Value::Integer(env.is_thumb as i64),
        "defined" => Value::Integer(0), // resolved specially by the caller; see parser
        "regex_match" => {
            let haystack = stringify(&args[0]);
            let pattern = stringify(&args[1]);
            Value::Integer(compile_regex(&pattern)?.is_match(&haystack) as i64)
        }
        "regex_search" => {
            let haystack = stringify(&args[0]);
            let pattern = stringify(&args[1]);
            match compile_regex(&pattern)?.find(&haystack) {
                Some(m) => Value::Integer(m.start() as i64),
                None => Value::Integer(-1),
            }
        }
        "regex_extract" => {
            let haystack = stringify(&args[0]);
            let pattern = stringify(&args[1]);
            let group = args.get(2).and_then(|a| a.as_i64()).unwrap_or(0).max(0) as usize;
            let re = compile_regex(&pattern)?;
            match re.captures(&haystack).and_then(|c| c.get(group)) {
                Some(m) => Value::Str(m.as_str().to_string()),
                None => Value::Str("undef".to_string()),
            }
        }
        _ => Value::Invalid,
    })
}

fn compile_regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::InvalidArgument { argument: format!("{pattern}: {e}") })
}

fn file_path(env: &EvalEnv, v: &Value) -> std::path::PathBuf {
    env.root_dir.join(stringify(v))
}

fn stringify(v: &Value) -> String {
    match v {
        Value::Str(s) => s.clone(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Invalid => "undef".to_string(),
    }
}

fn read_int(env: &EvalEnv, args: &[Value], size: usize, signed: bool) -> Value {
    let path = file_path(env, &args[0]);
    let offset = args.get(1).and_then(|a| a.as_i64()).unwrap_or(0).max(0) as usize;
    match fs::read(&path) {
        Ok(bytes) => {
            if offset + size > bytes.len() {
                return Value::Str("undef".to_string());
            }
            let mut buf = [0u8; 8];
            buf[..size].copy_from_slice(&bytes[offset..offset + size]);
            let unsigned = u64::from_le_bytes(buf);
            if signed {
                let shift = 64 - size * 8;
                Value::Integer(((unsigned << shift) as i64) >> shift)
            } else {
                Value::Integer(unsigned as i64)
            }
        }
        Err(_) => Value::Str("undef".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hi_lo_roundtrip_for_negative_low_half() {
        let addr: i64 = 0x8000_1234u32 as i64;
        let high = hi(addr);
        let low = lo(addr);
        let reconstructed = ((high << 16) | (low & 0xFFFF)) as i32 as i64;
        assert_eq!(reconstructed as u32, addr as u32);
    }

    #[test]
    fn tohex_pads_to_requested_digit_count() {
        let env_digits = 4usize;
        let hex = format!("{:X}", 0xABi64);
        let padded = format!("{:0>width$}", hex, width = env_digits);
        assert_eq!(padded, "00AB");
    }

    #[test]
    fn substr_of_full_length_is_identity() {
        let s = "hello world";
        let len = s.chars().count();
        let taken: String = s.chars().take(len).collect();
        assert_eq!(taken, s);
    }

    #[test]
    fn regex_match_requires_full_pattern_match_somewhere() {
        let re = compile_regex(r"^v\d+\.\d+$").unwrap();
        assert!(re.is_match("v1.2"));
        assert!(!re.is_match("v1.2.3"));
    }

    #[test]
    fn regex_extract_returns_named_capture_group() {
        let re = compile_regex(r"lib(\w+)\.a").unwrap();
        let text = "libfoo.a";
        let captured = re.captures(text).and_then(|c| c.get(1)).unwrap().as_str();
        assert_eq!(captured, "foo");
    }
}
