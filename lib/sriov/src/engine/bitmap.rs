// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use crate::api::VfIndex;

/// Words in a VF bitmap: enough for 64 pools.
pub const VF_BITMAP_WORDS: usize = 2;

/// A set of VFs laid out the way the device reports them: VF `n` is
/// bit `n % 32` of word `n / 32`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct VfBitmap {
    words: [u32; VF_BITMAP_WORDS],
}

impl VfBitmap {
    pub fn from_words(words: [u32; VF_BITMAP_WORDS]) -> Self {
        Self { words }
    }

    pub fn words(&self) -> [u32; VF_BITMAP_WORDS] {
        self.words
    }

    pub fn set(&mut self, vf: VfIndex) {
        if let Some(w) = self.words.get_mut(vf.reg_offset() as usize) {
            *w |= vf.bit();
        }
    }

    pub fn is_set(&self, vf: VfIndex) -> bool {
        self.words
            .get(vf.reg_offset() as usize)
            .is_some_and(|w| w & vf.bit() != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Iterate the VFs in the set, lowest first.
    pub fn iter(&self) -> SetBits {
        SetBits { words: self.words, word: 0 }
    }
}

pub struct SetBits {
    words: [u32; VF_BITMAP_WORDS],
    word: usize,
}

impl Iterator for SetBits {
    type Item = VfIndex;

    fn next(&mut self) -> Option<VfIndex> {
        while self.word < VF_BITMAP_WORDS {
            let w = &mut self.words[self.word];
            if *w == 0 {
                self.word += 1;
                continue;
            }

            let bit = w.trailing_zeros();
            *w &= *w - 1;
            return Some(VfIndex::new((self.word as u32 * 32 + bit) as u16));
        }

        None
    }
}
