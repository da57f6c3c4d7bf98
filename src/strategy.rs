use crate::config::Geometry;
use crate::error::{Error, Result};
use crate::space::{enumerate, BitReversedSpace};

/// Which part of the message buffer is varied from round to round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchMode {
    /// Enumerate the whole message buffer.
    Full,
    /// Hold the memory suffix fixed and enumerate register prefixes.
    FixedMemory(Vec<u8>),
    /// Hold the register prefix fixed and enumerate memory suffixes.
    FixedRegister(Vec<u8>),
}

impl SearchMode {
    pub fn name(&self) -> &'static str {
        match self {
            SearchMode::Full => "full",
            SearchMode::FixedMemory(_) => "fixed-memory",
            SearchMode::FixedRegister(_) => "fixed-register",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchStrategy {
    geometry: Geometry,
    mode: SearchMode,
    start_index: u128,
    repeat: bool,
}

impl SearchStrategy {
    pub fn new(geometry: Geometry, mode: SearchMode) -> Self {
        Self {
            geometry,
            mode,
            start_index: 0,
            repeat: true,
        }
    }

    /// Begin the first pass at `index` instead of the start of the space.
    /// Later passes start from the beginning. With repetition on, an index
    /// past the end wraps around the space; without it, it is an error.
    pub fn resume_from(mut self, index: u128) -> Self {
        self.start_index = index;
        self
    }

    /// When false, stop after one pass over the space instead of restarting.
    pub fn repeat(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn mode(&self) -> &SearchMode {
        &self.mode
    }

    /// Width of the enumerated component.
    pub fn varied_width(&self) -> usize {
        match self.mode {
            SearchMode::Full => self.geometry.message_width(),
            SearchMode::FixedMemory(_) => self.geometry.register_width(),
            SearchMode::FixedRegister(_) => self.geometry.memory_width(),
        }
    }

    /// Assemble a full message from one enumerated component.
    pub fn assemble(&self, varied: Vec<u8>) -> Vec<u8> {
        match &self.mode {
            SearchMode::Full => varied,
            SearchMode::FixedMemory(memory) => {
                let mut buffer = varied;
                buffer.extend_from_slice(memory);
                buffer
            }
            SearchMode::FixedRegister(register) => {
                let mut buffer = Vec::with_capacity(register.len() + varied.len());
                buffer.extend_from_slice(register);
                buffer.extend(varied);
                buffer
            }
        }
    }

    /// Probe buffers, restarting the same finite enumeration every time it
    /// is exhausted unless repetition is switched off.
    pub fn buffers(&self) -> Result<Buffers<'_>> {
        let width = self.varied_width();
        let start = match BitReversedSpace::space_size(width) {
            Some(size) if self.start_index >= size => {
                if !self.repeat {
                    return Err(Error::ResumePastEnd {
                        index: self.start_index,
                        width,
                    });
                }
                self.start_index % size
            }
            _ => self.start_index,
        };
        let space = BitReversedSpace::starting_at(width, start)?;
        Ok(Buffers {
            strategy: self,
            width,
            space,
            passes: 0,
        })
    }
}

pub struct Buffers<'a> {
    strategy: &'a SearchStrategy,
    width: usize,
    space: BitReversedSpace,
    passes: u64,
}

impl Buffers<'_> {
    /// Number of times the enumeration has been restarted.
    pub fn passes(&self) -> u64 {
        self.passes
    }
}

impl Iterator for Buffers<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        let varied = match self.space.next() {
            Some(varied) => varied,
            None if self.strategy.repeat => {
                self.passes += 1;
                tracing::debug!(passes = self.passes, "enumeration exhausted, restarting");
                // Width was validated when the first pass was built.
                self.space = enumerate(self.width).ok()?;
                self.space.next()?
            }
            None => return None,
        };
        Some(self.strategy.assemble(varied))
    }
}
