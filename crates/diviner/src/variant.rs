//! Variant registry.
//!
//! Each diviner version is a case of [`Variant`]. Its [`VariantSpec`] binds the
//! producer, comparator, artifact layout and oracle page format for that
//! version. Adding a version means adding a case here and nothing in the
//! orchestrator.

use std::fmt;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::Serialize;

use crate::compare::{Comparator, DiagnosticMultiset, ExactMatch, SubstitutedLines};
use crate::oracle::PageExtraction;
use crate::producer::{self, ProduceFn};

/// Default oracle endpoint, `{version}` is replaced by the version number.
pub const ORACLE_URL_TEMPLATE: &str = "https://compilers.cool/oracles/o{version}/";

static EXACT: ExactMatch = ExactMatch;
static DIAGNOSTICS: DiagnosticMultiset = DiagnosticMultiset;
static THREE_ADDRESS: SubstitutedLines = SubstitutedLines::THREE_ADDRESS_CODE;

/// Supported diviner versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Lexer: token listing plus lexical errors
    #[value(name = "d1", alias = "D1")]
    D1,
    /// Parser: unparsed source reconstruction
    #[value(name = "d3", alias = "D3")]
    D3,
    /// Type checker: diagnostics, position and order insensitive
    #[value(name = "d5", alias = "D5")]
    D5,
    /// Three-address code generation
    #[value(name = "d6", alias = "D6")]
    D6,
    /// x86-64 code generation, assembled, linked and executed
    #[value(name = "d7", alias = "D7")]
    D7,
}

/// Side-effect files a variant's compiler run writes, per test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifacts {
    None,
    Tokens { tokens: PathBuf, errors: PathBuf },
    Unparsed { unparsed: PathBuf },
    ThreeAddress { out: PathBuf },
    Codegen {
        asm: PathBuf,
        object: PathBuf,
        exe: PathBuf,
        out: PathBuf,
    },
}

impl Artifacts {
    pub fn paths(&self) -> Vec<&Path> {
        match self {
            Artifacts::None => vec![],
            Artifacts::Tokens { tokens, errors } => vec![tokens, errors],
            Artifacts::Unparsed { unparsed } => vec![unparsed],
            Artifacts::ThreeAddress { out } => vec![out],
            Artifacts::Codegen {
                asm,
                object,
                exe,
                out,
            } => vec![asm, object, exe, out],
        }
    }
}

/// Static definition of one variant.
pub struct VariantSpec {
    pub variant: Variant,
    pub version: u8,
    pub produce: ProduceFn,
    pub comparator: &'static dyn Comparator,
    pub artifacts: fn(&Path, &str) -> Artifacts,
    pub extraction: PageExtraction,
}

impl Variant {
    pub const ALL: [Variant; 5] = [
        Variant::D1,
        Variant::D3,
        Variant::D5,
        Variant::D6,
        Variant::D7,
    ];

    pub fn spec(self) -> VariantSpec {
        match self {
            Variant::D1 => VariantSpec {
                variant: self,
                version: 1,
                produce: producer::tokens,
                comparator: &EXACT,
                artifacts: |dir, base| Artifacts::Tokens {
                    tokens: dir.join(format!("{base}_tokens.txt")),
                    errors: dir.join(format!("{base}_errors.txt")),
                },
                extraction: PageExtraction::TokensAndErrors,
            },
            Variant::D3 => VariantSpec {
                variant: self,
                version: 3,
                produce: producer::unparse,
                comparator: &EXACT,
                artifacts: |dir, base| Artifacts::Unparsed {
                    unparsed: dir.join(format!("{base}_unparsed.out")),
                },
                extraction: PageExtraction::FirstBlock,
            },
            Variant::D5 => VariantSpec {
                variant: self,
                version: 5,
                produce: producer::check,
                comparator: &DIAGNOSTICS,
                artifacts: |_, _| Artifacts::None,
                extraction: PageExtraction::FirstBlock,
            },
            Variant::D6 => VariantSpec {
                variant: self,
                version: 6,
                produce: producer::three_address,
                comparator: &THREE_ADDRESS,
                artifacts: |dir, base| Artifacts::ThreeAddress {
                    out: dir.join(format!("{base}.out")),
                },
                extraction: PageExtraction::FirstBlock,
            },
            Variant::D7 => VariantSpec {
                variant: self,
                version: 7,
                produce: producer::codegen,
                comparator: &EXACT,
                artifacts: |dir, base| Artifacts::Codegen {
                    asm: dir.join(format!("{base}.s")),
                    object: dir.join(format!("{base}.o")),
                    exe: dir.join(format!("{base}.exe")),
                    out: dir.join(format!("{base}.out")),
                },
                extraction: PageExtraction::FirstBlock,
            },
        }
    }

    pub fn version(self) -> u8 {
        self.spec().version
    }

    pub fn oracle_url(self) -> String {
        ORACLE_URL_TEMPLATE.replace("{version}", &self.version().to_string())
    }

    /// Boxed run banner, e.g. `| THE DIVINER (P5) |`.
    pub fn title(self) -> String {
        make_title(&format!("THE DIVINER (P{})", self.version()))
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d{}", self.version())
    }
}

pub fn make_title(msg: &str) -> String {
    let bar = "=".repeat(msg.chars().count() + 2);
    format!("+{bar}+\n| {msg} |\n+{bar}+")
}
