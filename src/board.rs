/// Hardware abstraction for supported boards.
///
/// Each board module defines pin assignments and capabilities
/// selected at compile time via feature flags.

#[cfg(feature = "board-xiao")]
mod hw {
    pub const BUZZER_PIN: u8 = 3; // Passive buzzer on D2
    pub const BUZZER_FREQ_HZ: u32 = 2_700;
    pub const BUZZER_BEEP_MS: u64 = 120;
    pub const BOARD_NAME: &str = "xiao_esp32s3";
}

#[cfg(feature = "board-m5stickc")]
mod hw {
    pub const BUZZER_PIN: u8 = 2;
    pub const BUZZER_FREQ_HZ: u32 = 4_000;
    pub const BUZZER_BEEP_MS: u64 = 80;
    pub const BOARD_NAME: &str = "m5stickc_plus2";
}

#[cfg(not(any(feature = "board-xiao", feature = "board-m5stickc")))]
mod hw {
    pub const BOARD_NAME: &str = "unknown";
}

pub use hw::*;

/// Flash offset of the key registry journal.
///
/// This is the `nvs` partition of the default ESP-IDF partition table; the
/// bare-metal firmware has no NVS and journals the blob there directly.
pub const STORAGE_FLASH_OFFSET: u32 = 0x9000;

/// Erase sectors in the journal ring (the whole 24 KiB `nvs` partition).
pub const STORAGE_SECTORS: u32 = 6;

/// Flash erase sector size.
pub const FLASH_SECTOR_SIZE: u32 = 4096;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_offset_sector_aligned() {
        assert_eq!(STORAGE_FLASH_OFFSET % FLASH_SECTOR_SIZE, 0);
        assert!(crate::defaults::MAX_BLOB_LEN as u32 <= FLASH_SECTOR_SIZE);
    }

    #[test]
    fn journal_stays_inside_nvs_partition() {
        assert!(STORAGE_SECTORS >= 2);
        assert!(STORAGE_FLASH_OFFSET + STORAGE_SECTORS * FLASH_SECTOR_SIZE <= 0x9000 + 0x6000);
    }

    #[test]
    #[cfg(not(any(feature = "board-xiao", feature = "board-m5stickc")))]
    fn host_build_is_unknown_board() {
        assert_eq!(BOARD_NAME, "unknown");
    }
}
