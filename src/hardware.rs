/// Hardware model the machine powers on as.
///
/// The core starts from the post-boot register state of the selected model;
/// no boot ROM is executed.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Model {
    /// Original monochrome Game Boy.
    #[default]
    Dmg,
    /// Game Boy Color.
    Cgb,
}

impl Model {
    pub const fn is_cgb(self) -> bool {
        matches!(self, Model::Cgb)
    }

    /// Pick a model for a ROM: CGB when the header's CGB flag (0x143 bit 7)
    /// is set, DMG otherwise.
    pub const fn for_cgb_flag(cgb: bool) -> Self {
        if cgb { Model::Cgb } else { Model::Dmg }
    }
}
