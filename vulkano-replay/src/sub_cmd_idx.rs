use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::{
    cmp::Ordering,
    fmt::{Display, Error as FmtError, Formatter},
    ops::Index,
};

/// A hierarchical path locating a command in the stream, at any nesting depth.
///
/// The first component is the [`CmdId`] of a top-level command. For a `QueueSubmit`, the
/// following components are the index of the submission batch, the index of the command buffer
/// in the batch, and the index of the command in the command buffer. For an `ExecuteCommands`
/// they continue with the index of the secondary command buffer and the index of the command in
/// it, and so on. For example `[5, 0, 1, 3]` is the fourth command of the second command buffer
/// of the first batch of command 5.
///
/// Paths are ordered in execution order: siblings compare by index, and a path sorts before all
/// of its ancestors, because the commands nested in a command execute before the command is
/// complete. Work inserted "after" a command buffer therefore comes after work inserted after
/// any of its commands.
///
/// [`CmdId`]: crate::command::CmdId
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubCmdIdx(SmallVec<[u64; 4]>);

impl SubCmdIdx {
    /// Creates a path from its components.
    #[inline]
    pub fn new(components: &[u64]) -> Self {
        SubCmdIdx(SmallVec::from_slice(components))
    }

    #[inline]
    pub fn as_slice(&self) -> &[u64] {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the last component.
    #[inline]
    pub fn last(&self) -> Option<u64> {
        self.0.last().copied()
    }

    /// Returns the path of the `index`th child of this path.
    #[inline]
    pub fn child(&self, index: u64) -> Self {
        let mut child = self.clone();
        child.0.push(index);

        child
    }

    /// Returns the path of the parent, or `None` for a top-level or empty path.
    #[inline]
    pub fn parent(&self) -> Option<Self> {
        (self.len() > 1).then(|| SubCmdIdx(SmallVec::from_slice(&self.0[..self.len() - 1])))
    }

    /// Returns whether `other` is a strict descendant of `self`.
    #[inline]
    pub fn is_ancestor_of(&self, other: &SubCmdIdx) -> bool {
        other.len() > self.len() && other.0.starts_with(&self.0)
    }

    /// Returns whether `other` is `self` or one of its descendants.
    #[inline]
    pub fn contains(&self, other: &SubCmdIdx) -> bool {
        other.0.starts_with(&self.0)
    }

    /// Returns whether `self` lies among the children of `parent` with an index in
    /// `begin..end`, or among their descendants.
    pub fn in_range(&self, parent: &SubCmdIdx, begin: u64, end: u64) -> bool {
        parent.is_ancestor_of(self) && (begin..end).contains(&self.0[parent.len()])
    }

    /// Adds `offset` to the first component.
    ///
    /// # Panics
    ///
    /// - Panics if the path is empty.
    #[inline]
    pub fn offset_first(&mut self, offset: u64) {
        self.0[0] += offset;
    }
}

impl From<&[u64]> for SubCmdIdx {
    #[inline]
    fn from(val: &[u64]) -> Self {
        Self::new(val)
    }
}

impl<const N: usize> From<[u64; N]> for SubCmdIdx {
    #[inline]
    fn from(val: [u64; N]) -> Self {
        Self::new(&val)
    }
}

impl Index<usize> for SubCmdIdx {
    type Output = u64;

    #[inline]
    fn index(&self, index: usize) -> &u64 {
        &self.0[index]
    }
}

impl Ord for SubCmdIdx {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(&other.0) {
            match a.cmp(b) {
                Ordering::Equal => {}
                ordering => return ordering,
            }
        }

        // One is a prefix of the other. Descendants execute first.
        other.len().cmp(&self.len())
    }
}

impl PartialOrd for SubCmdIdx {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for SubCmdIdx {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(f, "[")?;

        for (i, component) in self.0.iter().enumerate() {
            if i != 0 {
                write!(f, ", ")?;
            }

            write!(f, "{component}")?;
        }

        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::SubCmdIdx;

    #[test]
    fn execution_order() {
        let mut paths: Vec<SubCmdIdx> = vec![
            [3].into(),
            [2, 0, 1].into(),
            [2, 0, 1, 4].into(),
            [2].into(),
            [2, 0, 0, 7].into(),
            [1, 5].into(),
        ];
        paths.sort();

        let expected: Vec<SubCmdIdx> = vec![
            [1, 5].into(),
            [2, 0, 0, 7].into(),
            [2, 0, 1, 4].into(),
            [2, 0, 1].into(),
            [2].into(),
            [3].into(),
        ];
        assert_eq!(paths, expected);
    }

    #[test]
    fn relations() {
        let submit = SubCmdIdx::from([2]);
        let command = SubCmdIdx::from([2, 0, 1, 3]);

        assert!(submit.is_ancestor_of(&command));
        assert!(!command.is_ancestor_of(&submit));
        assert!(!submit.is_ancestor_of(&submit));
        assert!(submit.contains(&submit));
        assert_eq!(command.parent(), Some([2, 0, 1].into()));
        assert_eq!(submit.parent(), None);
        assert_eq!(submit.child(0).child(1), SubCmdIdx::from([2, 0, 1]));

        let command_buffer = SubCmdIdx::from([2, 0, 1]);
        assert!(command.in_range(&command_buffer, 1, 4));
        assert!(!command.in_range(&command_buffer, 4, 8));
        assert!(!command_buffer.in_range(&command_buffer, 0, 8));
    }

    #[test]
    fn display() {
        assert_eq!(SubCmdIdx::from([2, 1, 3]).to_string(), "[2, 1, 3]");
    }
}
