// Variant key table and option matching
//
// Each program owns a run of `static_key_length + dynamic_key_length` words.
// Option descriptors say which word of the run holds their packed choice.

use std::collections::HashMap;

use super::model::ShaderModel;
use super::resources::ShaderOption;
use crate::error::{ArchiveError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Static,
    Dynamic,
}

impl ShaderModel {
    /// The key run of `program`.
    pub fn program_keys(&self, program: usize) -> Option<&[i32]> {
        let width = self.keys_per_program();
        let start = program.checked_mul(width)?;
        self.key_table.get(start..start + width)
    }

    /// Index into the key table of `option`'s word for `program`.
    fn key_slot(&self, program: usize, option: &ShaderOption, kind: OptionKind) -> Result<usize> {
        let base = program * self.keys_per_program();
        let within = match kind {
            OptionKind::Static => Some(option.bit32_index as usize),
            OptionKind::Dynamic => (option.bit32_index as usize)
                .checked_sub(option.key_offset as usize)
                .map(|i| self.static_key_length as usize + i),
        };
        within
            .filter(|&i| i < self.keys_per_program())
            .map(|i| base + i)
            .filter(|&slot| slot < self.key_table.len())
            .ok_or_else(|| {
                ArchiveError::malformed(format!(
                    "option '{}' addresses a key word outside program {program}'s run",
                    option.name
                ))
            })
    }

    /// Choice name `option` takes in `program`.
    pub fn program_choice<'a>(
        &'a self,
        program: usize,
        option: &'a ShaderOption,
        kind: OptionKind,
    ) -> Result<&'a str> {
        let slot = self.key_slot(program, option, kind)?;
        option.choice_name(self.key_table[slot])
    }

    /// Every option's choice in `program`, static options first.
    pub fn program_choices(&self, program: usize) -> Result<Vec<(&str, &str)>> {
        let statics = self
            .static_options
            .iter()
            .map(|(name, option)| (name, option, OptionKind::Static));
        let dynamics = self
            .dynamic_options
            .iter()
            .map(|(name, option)| (name, option, OptionKind::Dynamic));
        statics
            .chain(dynamics)
            .map(|(name, option, kind)| Ok((name, self.program_choice(program, option, kind)?)))
            .collect()
    }

    /// Whether `program` was compiled with every requested choice.
    /// Options missing from `requested` never reject.
    pub fn is_program_match(
        &self,
        program: usize,
        requested: &HashMap<String, String>,
    ) -> Result<bool> {
        let options = self
            .static_options
            .iter()
            .map(|(name, option)| (name, option, OptionKind::Static))
            .chain(
                self.dynamic_options
                    .iter()
                    .map(|(name, option)| (name, option, OptionKind::Dynamic)),
            );
        for (name, option, kind) in options {
            let Some(wanted) = requested.get(name) else {
                continue;
            };
            if self.program_choice(program, option, kind)? != wanted {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// First program compiled with every requested choice, if any.
    ///
    /// A corrupt key word is an error, not a mismatch.
    pub fn resolve(&self, requested: &HashMap<String, String>) -> Result<Option<usize>> {
        for program in 0..self.programs.len() {
            if self.is_program_match(program, requested)? {
                return Ok(Some(program));
            }
        }
        Ok(None)
    }
}
