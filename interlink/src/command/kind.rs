/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

use serde::{Deserialize, Serialize};

/// The six shapes a command can take.
///
/// Functions only bind to commands of the same kind, and the kind decides
/// whether a command may be queued at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    /// No argument, no result.
    Void,
    /// No argument, returns a value.
    VoidReturn,
    /// One argument, no result.
    Write,
    /// One argument, returns a value.
    WriteReturn,
    /// No argument, returns a value; always executes in the caller's task.
    Read,
    /// One argument, returns a value; always executes in the caller's task.
    QualifiedRead,
}

impl CommandKind {
    pub const ALL: [CommandKind; 6] = [
        CommandKind::Void,
        CommandKind::VoidReturn,
        CommandKind::Write,
        CommandKind::WriteReturn,
        CommandKind::Read,
        CommandKind::QualifiedRead,
    ];

    /// Read and qualified read commands are never queued.
    pub const fn is_queueable(self) -> bool {
        !matches!(self, CommandKind::Read | CommandKind::QualifiedRead)
    }

    /// Kinds whose queued form blocks the caller until a value is returned.
    pub const fn has_return(self) -> bool {
        matches!(
            self,
            CommandKind::VoidReturn
                | CommandKind::WriteReturn
                | CommandKind::Read
                | CommandKind::QualifiedRead
        )
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            CommandKind::Void => 0,
            CommandKind::VoidReturn => 1,
            CommandKind::Write => 2,
            CommandKind::WriteReturn => 3,
            CommandKind::Read => 4,
            CommandKind::QualifiedRead => 5,
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            CommandKind::Void => "void",
            CommandKind::VoidReturn => "void return",
            CommandKind::Write => "write",
            CommandKind::WriteReturn => "write return",
            CommandKind::Read => "read",
            CommandKind::QualifiedRead => "qualified read",
        };
        write!(f, "{text}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_reads_are_never_queued() {
        let never: Vec<_> = CommandKind::ALL
            .into_iter()
            .filter(|kind| !kind.is_queueable())
            .collect();
        assert_eq!(never, vec![CommandKind::Read, CommandKind::QualifiedRead]);
    }

    #[test]
    fn indices_are_distinct() {
        let mut seen = [false; 6];
        for kind in CommandKind::ALL {
            assert!(!seen[kind.index()]);
            seen[kind.index()] = true;
        }
    }
}
