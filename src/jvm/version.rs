use super::{ByteBuffer, Error, Serialize};

/// Version of the class file, which is used to verify that the loader has the
/// necessary features to interpret the class
#[derive(PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Clone, Copy)]
pub struct Version {
    pub minor_version: u16,
    pub major_version: u16,
}

impl Version {
    /// Class file version corresponding to Java SE 7 (first version with `StackMapTable`
    /// verification mandatory)
    pub const JAVA7: Version = Version {
        minor_version: 0,
        major_version: 51,
    };

    /// Class file version corresponding to Java SE 8 (released March 2014)
    pub const JAVA8: Version = Version {
        minor_version: 0,
        major_version: 52,
    };
}

impl Default for Version {
    fn default() -> Version {
        Version::JAVA7
    }
}

impl Serialize for Version {
    fn serialize(&self, buf: &mut ByteBuffer) -> Result<(), Error> {
        self.minor_version.serialize(buf)?;
        self.major_version.serialize(buf)?;
        Ok(())
    }
}
