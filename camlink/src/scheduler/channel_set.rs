use crate::channel::Channel;
use crate::{Error, Result};

/// Round-robin cursor over `len` positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rotation {
    len: usize,
    active: usize,
}

impl Rotation {
    pub fn new(len: usize) -> Self {
        Self { len, active: 0 }
    }

    pub fn active(&self) -> usize {
        self.active
    }

    /// Move to the next position, wrapping around.
    ///
    /// Returns `(previous, next)`, or `None` when there is nothing to rotate
    /// to (`len <= 1`).
    pub fn advance(&mut self) -> Option<(usize, usize)> {
        if self.len <= 1 {
            return None;
        }
        let previous = self.active;
        self.active = (self.active + 1) % self.len;
        Some((previous, self.active))
    }

    /// Make `index` the active position.
    pub fn set_active(&mut self, index: usize) -> Result<()> {
        if index >= self.len {
            return Err(Error::InvalidChannel {
                index,
                count: self.len,
            });
        }
        self.active = index;
        Ok(())
    }
}

/// The ordered set of detected channels.
///
/// Positions are assigned at detection time and never change.
#[derive(Debug)]
pub struct ChannelSet {
    channels: Vec<Channel>,
    rotation: Rotation,
}

impl ChannelSet {
    pub fn new(channels: Vec<Channel>) -> Self {
        let rotation = Rotation::new(channels.len());
        Self { channels, rotation }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Check that `index` names a channel.
    pub fn validate(&self, index: usize) -> Result<()> {
        if index < self.channels.len() {
            Ok(())
        } else {
            Err(Error::InvalidChannel {
                index,
                count: self.channels.len(),
            })
        }
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut Channel> {
        let count = self.channels.len();
        self.channels
            .get_mut(index)
            .ok_or(Error::InvalidChannel { index, count })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Channel> {
        self.channels.iter_mut()
    }

    pub fn active_index(&self) -> usize {
        self.rotation.active()
    }

    pub fn set_active(&mut self, index: usize) -> Result<()> {
        self.rotation.set_active(index)
    }

    /// See [`Rotation::advance`].
    pub fn advance(&mut self) -> Option<(usize, usize)> {
        self.rotation.advance()
    }
}
