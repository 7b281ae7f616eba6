//! The command dispatcher: reads a command script one line at a time and
//! routes each command to the core operations.
//!
//! Scripts are comma-separated, one command per line; `#` lines and blank
//! lines are skipped. Execution stops at the first failing command.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{error, info};
use typed_builder::TypedBuilder;

use crate::elf::ElfFile;
use crate::error::{Error, Result};
use crate::ops;

/// How a `SAVE` command writes its output
#[derive(Debug, Clone, TypedBuilder)]
pub struct SaveOptions {
    /// Where to write the image
    #[builder(setter(into))]
    pub path: PathBuf,
    /// Whether an existing file may be replaced
    #[builder(default = false)]
    pub overwrite: bool,
    /// The mode bits applied to the written file
    #[builder(default = 0o744)]
    pub mode: u32,
}

/// A script executor holding the binary the commands operate on
#[derive(Debug, Default)]
pub struct Executor {
    binary: Option<ElfFile>,
}

impl Executor {
    /// A fresh executor with no binary loaded
    pub fn new() -> Self {
        Self::default()
    }

    /// The loaded binary
    pub fn binary(&self) -> Option<&ElfFile> {
        self.binary.as_ref()
    }

    fn binary_mut(&mut self) -> Result<&mut ElfFile> {
        self.binary.as_mut().ok_or(Error::NoBinaryLoaded)
    }

    /// Run a script to completion: 0 on full success, 1 on the first
    /// failing command, with the remaining lines not executed
    pub fn execute(&mut self, path: &Path) -> Result<i32> {
        let text = fs::read_to_string(path)?;
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if !self.execute_line(line, idx) {
                return Ok(1);
            }
        }
        Ok(0)
    }

    /// Run one command line; logs and reports failure
    pub fn execute_line(&mut self, line: &str, idx: usize) -> bool {
        let parts = line.split(',').map(str::trim).collect::<Vec<_>>();
        let Some((cmd, args)) = parts.split_first() else {
            return true;
        };
        match self.run_command(cmd, args) {
            Ok(()) => true,
            Err(e) => {
                error!("Command error on line {idx}: {e}\n\t{line}");
                false
            }
        }
    }

    fn run_command(&mut self, cmd: &str, args: &[&str]) -> Result<()> {
        let arity = |expected: usize| -> Result<()> {
            if args.len() != expected {
                Err(Error::CommandArity {
                    command: cmd.into(),
                    expected,
                    found: args.len(),
                })
            } else {
                Ok(())
            }
        };
        match cmd {
            "LOAD" => {
                arity(2)?;
                self.load(args[0], args[1])
            }
            "SAVE" => {
                arity(2)?;
                self.save(
                    SaveOptions::builder()
                        .path(args[0])
                        .overwrite(args[1] == "OVERWRITE")
                        .build(),
                )
            }
            "PRINT" => {
                arity(1)?;
                self.print(args[0])
            }
            "RENAME_SYMBOL" => {
                arity(4)?;
                self.rename_symbol(args[0], args[1], args[2], args[3])
            }
            "SET_SYMBOL_VERSION" => {
                arity(3)?;
                self.set_symbol_version(args[0], args[1], args[2])
            }
            "MOVE_SECTION" => {
                arity(2)?;
                let binary = self.binary_mut()?;
                ops::move_section_to_end(binary, args[0], args[1])?;
                info!("Moved section {} to the end of the program", args[0]);
                Ok(())
            }
            "MAKE_SEGMENT" => {
                arity(5)?;
                let binary = self.binary_mut()?;
                ops::add_segment_for_sections(
                    binary, args[0], args[1], args[2], args[3], args[4],
                )?;
                info!("Added a segment covering {} to {}", args[3], args[4]);
                Ok(())
            }
            "MOVE_SEGMENT" => {
                arity(3)?;
                let binary = self.binary_mut()?;
                ops::move_segment_for_sections(binary, args[0], args[1], args[2])?;
                info!("Moved segment {} to cover {} to {}", args[0], args[1], args[2]);
                Ok(())
            }
            "MAKE_DYN_TAG" => {
                arity(2)?;
                let binary = self.binary_mut()?;
                ops::add_dynamic_tag(binary, args[0], args[1])
            }
            other => Err(Error::UnknownCommand { name: other.into() }),
        }
    }

    fn load(&mut self, loader: &str, path: &str) -> Result<()> {
        if loader != "ELF" {
            return Err(Error::UnknownLoader {
                name: loader.into(),
            });
        }
        if self.binary.is_some() {
            return Err(Error::BinaryAlreadyLoaded);
        }
        let path = Path::new(path);
        if !path.exists() {
            return Err(Error::MissingFile {
                path: path.display().to_string(),
            });
        }
        let data = fs::read(path)?;
        self.binary = Some(ElfFile::from_bytes(&data)?);
        Ok(())
    }

    fn save(&mut self, opts: SaveOptions) -> Result<()> {
        if opts.path.exists() && !opts.overwrite {
            return Err(Error::DestinationExists {
                path: opts.path.display().to_string(),
            });
        }
        let binary = self.binary.as_mut().ok_or(Error::NoBinaryLoaded)?;
        info!("Path: \"{}\"", opts.path.display());

        binary.organize()?;
        if !binary.verify() {
            return Err(Error::VerifyFailed);
        }

        let mut file = fs::File::create(&opts.path)?;
        binary.to_bytes(&mut file)?;
        file.flush()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&opts.path, fs::Permissions::from_mode(opts.mode))?;
        }
        Ok(())
    }

    fn print(&mut self, section_name: &str) -> Result<()> {
        let binary = self.binary.as_ref().ok_or(Error::NoBinaryLoaded)?;
        let pos = binary.section_pos_by_name(section_name)?;
        let body = &binary
            .section_headers()
            .get(pos)
            .ok_or(Error::SectionNotFound {
                name: section_name.into(),
            })?
            .body;
        println!("{}", body.render(binary)?);
        Ok(())
    }

    fn rename_symbol(
        &mut self,
        old_name: &str,
        new_name: &str,
        which: &str,
        permissive: &str,
    ) -> Result<()> {
        if !["STATIC", "DYNAMIC", "BOTH"].contains(&which) {
            return Err(Error::BadArgument {
                arg: "which".into(),
                value: which.into(),
            });
        }
        if !["PERMISSIVE", "STRICT"].contains(&permissive) {
            return Err(Error::BadArgument {
                arg: "permissive".into(),
                value: permissive.into(),
            });
        }
        let rename_static = which == "STATIC" || which == "BOTH";
        let rename_dynamic = which == "DYNAMIC" || which == "BOTH";
        let permissive = permissive != "STRICT";
        let binary = self.binary_mut()?;
        if rename_static
            && ops::rename_symbol_in_table(binary, old_name, new_name, ".symtab", permissive)?
        {
            info!("Renamed {old_name} to {new_name} in the static symbol table");
        }
        if rename_dynamic
            && ops::rename_symbol_in_table(binary, old_name, new_name, ".dynsym", permissive)?
        {
            info!("Renamed {old_name} to {new_name} in the dynamic symbol table");
        }
        Ok(())
    }

    fn set_symbol_version(
        &mut self,
        symbol_name: &str,
        version: &str,
        permissive: &str,
    ) -> Result<()> {
        let version: i64 = version.parse().map_err(|_| Error::InvalidIntLiteral {
            value: version.into(),
        })?;
        let permissive = permissive == "PERMISSIVE";
        let binary = self.binary_mut()?;
        if ops::set_symbol_library_version(binary, symbol_name, version, permissive)? {
            info!("Reset library version for {symbol_name} to {version}");
        }
        Ok(())
    }
}
