//! machdump - Dump BSD archives and 64-bit Mach-O object files.
//!
//! Prints archive member headers and symbol directories, object file load
//! commands and symbol tables, and symbols defined by more than one archive
//! member.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use memmap2::Mmap;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

use machdump::archive::{SymbolDirectory, ARFMAG};
use machdump::macho::{CommandPayload, SymbolKind, SymbolTable};
use machdump::{Archive, Member, ObjectFile, Symbol};

/// Dump BSD archives and 64-bit Mach-O object files.
#[derive(Parser, Debug)]
#[command(name = "machdump")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (0=quiet, 1=warnings, 2=info, 3=debug)
    #[arg(short, long, default_value = "1", global = true)]
    verbosity: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print archive member headers and the symbol directory
    Ar {
        /// Path to the archive
        path: PathBuf,
    },

    /// Print object file load commands and symbols
    Sym {
        /// Path to the 64-bit Mach-O file
        path: PathBuf,
    },

    /// List symbols defined by more than one archive member
    Dupes {
        /// Path to the archive
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbosity);

    match cli.command {
        Commands::Ar { path } => cmd_ar(&path),
        Commands::Sym { path } => cmd_sym(&path),
        Commands::Dupes { path } => cmd_dupes(&path),
    }
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        _ => Level::DEBUG,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).ok();
}

/// Memory-maps a file read-only.
fn map_file(path: &Path) -> machdump::Result<Mmap> {
    let file = File::open(path).map_err(|e| machdump::Error::FileOpen {
        path: path.to_path_buf(),
        source: e,
    })?;

    // The mapping is only ever read; callers must not modify the file meanwhile.
    let mmap = unsafe { Mmap::map(&file) }.map_err(|e| machdump::Error::MemoryMap {
        path: path.to_path_buf(),
        source: e,
    })?;

    info!("Mapped {} ({} bytes)", path.display(), mmap.len());
    Ok(mmap)
}

// =============================================================================
// Archives
// =============================================================================

fn cmd_ar(path: &Path) -> Result<()> {
    let mmap = map_file(path)?;
    let archive =
        Archive::open(&mmap).with_context(|| format!("Failed to open archive: {}", path.display()))?;

    for member in archive.members() {
        let member =
            member.with_context(|| format!("Failed to read member of {}", path.display()))?;

        print!("{}", format_member_header(&member));

        if member.is_symbol_directory() {
            let directory = archive
                .decode_symbol_directory(&member)
                .with_context(|| format!("Failed to decode symbol directory '{}'", member.name))?;
            print_symbol_directory(&archive, &directory)?;
        }
    }

    Ok(())
}

fn format_member_header(member: &Member<'_>) -> String {
    let suffix = if member.has_extended_name() {
        " (extended BSD name)"
    } else {
        ""
    };
    format!(
        "ar_name: {}{}\nar_date: {}\nar_uid: {}\nar_gid: {}\nar_mode: {:o}\nar_size: {}\nar_fmag: {}\n",
        member.name,
        suffix,
        member.mtime,
        member.uid,
        member.gid,
        member.mode,
        member.size(),
        ARFMAG.escape_ascii()
    )
}

fn print_symbol_directory(archive: &Archive<'_>, directory: &SymbolDirectory<'_>) -> Result<()> {
    let mut names = MemberNames::new(archive);
    for entry in directory.entries() {
        let entry = entry?;
        println!("{} {}", entry.name, names.lookup(entry.member_offset)?);
    }
    Ok(())
}

/// Caches member names by header offset; directories point at few distinct members.
struct MemberNames<'a, 'b> {
    archive: &'b Archive<'a>,
    names: HashMap<usize, &'a str>,
}

impl<'a, 'b> MemberNames<'a, 'b> {
    fn new(archive: &'b Archive<'a>) -> Self {
        Self {
            archive,
            names: HashMap::new(),
        }
    }

    fn lookup(&mut self, offset: usize) -> Result<&'a str> {
        if let Some(&name) = self.names.get(&offset) {
            return Ok(name);
        }
        let name = self
            .archive
            .member_at(offset)
            .with_context(|| format!("Symbol directory points at bad member offset {offset:#x}"))?
            .name;
        self.names.insert(offset, name);
        Ok(name)
    }
}

fn cmd_dupes(path: &Path) -> Result<()> {
    let mmap = map_file(path)?;
    let archive =
        Archive::open(&mmap).with_context(|| format!("Failed to open archive: {}", path.display()))?;

    let Some(directory) = archive
        .symbol_directory()
        .with_context(|| format!("Failed to read symbol directory of {}", path.display()))?
    else {
        println!("{} has no symbol directory", path.display());
        return Ok(());
    };

    let mut names = MemberNames::new(&archive);
    let mut definitions = Vec::with_capacity(directory.len());
    for entry in directory.entries() {
        let entry = entry?;
        definitions.push((entry.name, names.lookup(entry.member_offset)?));
    }

    for (symbol, members) in duplicate_definitions(definitions) {
        println!("{} defined in:", symbol);
        for member in members {
            println!("  {}", member);
        }
    }

    Ok(())
}

/// Groups `(symbol, member)` pairs by symbol, keeping symbols with more than one definition.
fn duplicate_definitions<'a>(
    definitions: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Vec<(&'a str, Vec<&'a str>)> {
    let mut by_symbol: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (symbol, member) in definitions {
        by_symbol.entry(symbol).or_default().push(member);
    }
    debug!("{} distinct symbols", by_symbol.len());

    by_symbol
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .collect()
}

// =============================================================================
// Object Files
// =============================================================================

fn cmd_sym(path: &Path) -> Result<()> {
    let mmap = map_file(path)?;
    let object = ObjectFile::open(&mmap)
        .with_context(|| format!("Failed to open object file: {}", path.display()))?;

    println!("Filetype: {}", object.file_type());
    println!("{} load commands", object.header().ncmds);

    for lc in object.load_commands() {
        let lc = lc.with_context(|| format!("Failed to read load command in {}", path.display()))?;
        println!("cmd {:#x}, size {}", lc.cmd, lc.cmdsize);

        match lc.payload {
            CommandPayload::Symtab(symtab) => {
                let table = object.symbol_table(&symtab)?;
                print_symbols(&table)?;
            }
            CommandPayload::Dylinker { name } => println!("  dylinker {}", name),
            CommandPayload::Dylib(dylib) => println!(
                "  {:?} dylib {} (current {}, compatibility {})",
                dylib.kind, dylib.name, dylib.current_version, dylib.compatibility_version
            ),
            CommandPayload::Segment(segment) => {
                println!("  {}", segment.command);
                for section in segment.sections() {
                    println!("    {}", section?);
                }
            }
            CommandPayload::Uuid(uuid) => {
                let hex: String = uuid.iter().map(|b| format!("{b:02X}")).collect();
                println!("  uuid {}", hex);
            }
            CommandPayload::Unknown { .. } => {
                debug!("{} not decoded", lc.name().unwrap_or("unknown command"));
            }
        }
    }

    Ok(())
}

fn print_symbols(table: &SymbolTable<'_>) -> Result<()> {
    for symbol in table.symbols() {
        println!("{}", format_symbol(&symbol?));
    }
    Ok(())
}

fn format_symbol(symbol: &Symbol<'_>) -> String {
    let mut line = format!("{:>30}  ", symbol.name.unwrap_or("(null)"));

    if symbol.is_debug() {
        line.push_str(&format!("  N_STAB {:x}", symbol.n_type));
    } else {
        line.push_str(&format!(
            "{:>6}{:>6} type ",
            if symbol.is_private_external() { "N_PEXT" } else { "" },
            if symbol.is_external() { "N_EXT" } else { "" },
        ));
        match symbol.kind() {
            SymbolKind::Undefined => line.push_str("N_UNDF"),
            SymbolKind::Absolute => line.push_str("N_ABS "),
            SymbolKind::Section => line.push_str("N_SECT"),
            SymbolKind::PreboundUndefined => line.push_str("N_PBUD"),
            SymbolKind::Indirect => {
                line.push_str(&format!("N_INDR -> {}", symbol.indirect_name.unwrap_or("")))
            }
            SymbolKind::Other(bits) => line.push_str(&format!("{bits:x}")),
        }
    }

    line.push_str(&format!(
        "    n_sect {:03} n_desc 0x{:04x}    n_value 0x{:x}",
        symbol.n_sect, symbol.n_desc, symbol.n_value
    ));
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol(name: Option<&'static str>, n_type: u8) -> Symbol<'static> {
        Symbol {
            index: 0,
            name,
            n_type,
            n_sect: 1,
            n_desc: 0x10,
            n_value: 0x100003f50,
            indirect_name: None,
        }
    }

    #[test]
    fn test_format_defined_symbol() {
        let line = format_symbol(&symbol(Some("_main"), 0x0F));
        assert_eq!(
            line,
            format!(
                "{:>30}  {:>6}{:>6} type N_SECT    n_sect 001 n_desc 0x0010    n_value 0x100003f50",
                "_main", "", "N_EXT"
            )
        );
    }

    #[test]
    fn test_format_unnamed_debug_symbol() {
        let line = format_symbol(&symbol(None, 0x64));
        assert!(line.starts_with(&format!("{:>30}    N_STAB 64", "(null)")));
    }

    #[test]
    fn test_format_indirect_symbol() {
        let mut sym = symbol(Some("_alias"), 0x0B);
        sym.indirect_name = Some("_target");
        assert!(format_symbol(&sym).contains("N_INDR -> _target"));
    }

    #[test]
    fn test_member_header_lines() {
        let member = Member {
            offset: 8,
            name: "long_member_name.o",
            extended_name_len: Some(20),
            mtime: 1487552916,
            uid: 501,
            gid: 20,
            mode: 0o100644,
            payload_offset: 88,
            payload: b"ABCD",
            record_size: 84,
        };
        assert_eq!(
            format_member_header(&member),
            "ar_name: long_member_name.o (extended BSD name)\n\
             ar_date: 1487552916\n\
             ar_uid: 501\n\
             ar_gid: 20\n\
             ar_mode: 100644\n\
             ar_size: 4\n\
             ar_fmag: `\\n\n"
        );
    }

    #[test]
    fn test_duplicate_definitions() {
        let groups = duplicate_definitions([
            ("_foo", "a.o"),
            ("_bar", "a.o"),
            ("_foo", "b.o"),
            ("_baz", "c.o"),
            ("_bar", "c.o"),
            ("_foo", "c.o"),
        ]);
        assert_eq!(
            groups,
            vec![("_bar", vec!["a.o", "c.o"]), ("_foo", vec!["a.o", "b.o", "c.o"])]
        );

        assert!(duplicate_definitions([("_only", "a.o")]).is_empty());
    }

    #[test]
    fn test_cli_requires_one_path() {
        assert!(Cli::try_parse_from(["machdump", "ar"]).is_err());
        assert!(Cli::try_parse_from(["machdump", "sym", "a.o", "b.o"]).is_err());
        assert!(Cli::try_parse_from(["machdump", "dupes", "libfoo.a"]).is_ok());
    }
}
