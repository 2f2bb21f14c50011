//! MAVLink checksum (CRC-16/MCRF4XX) and the per-message CRC_EXTRA seeds.

/// Running X.25 checksum as used by MAVLink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct X25 {
    crc: u16,
}

impl Default for X25 {
    fn default() -> Self {
        Self::new()
    }
}

impl X25 {
    /// Starts a checksum at the MAVLink seed value
    pub fn new() -> Self {
        X25 { crc: 0xFFFF }
    }

    /// Folds one byte into the checksum
    pub fn accumulate(&mut self, byte: u8) {
        let mut tmp = byte ^ (self.crc & 0xFF) as u8;
        tmp ^= tmp << 4;
        let tmp = tmp as u16;
        self.crc = (self.crc >> 8) ^ (tmp << 8) ^ (tmp << 3) ^ (tmp >> 4);
    }

    /// Folds a slice into the checksum
    pub fn update(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.accumulate(b);
        }
    }

    pub fn value(&self) -> u16 {
        self.crc
    }
}

/// Checksum of a frame body followed by its CRC_EXTRA seed
pub fn frame_checksum(body: &[u8], crc_extra: u8) -> u16 {
    let mut crc = X25::new();
    crc.update(body);
    crc.accumulate(crc_extra);
    crc.value()
}

/// `(message id, CRC_EXTRA)` for the common and ardupilotmega dialects, sorted by id
const CRC_EXTRA: &[(u32, u8)] = &[
    // common, MAVLink 1 range
    (0, 50), (1, 124), (2, 137), (4, 237), (5, 217), (6, 104), (7, 119), (8, 117), (11, 89),
    (20, 214), (21, 159), (22, 220), (23, 168), (24, 24), (25, 23), (26, 170), (27, 144),
    (28, 67), (29, 115), (30, 39), (31, 246), (32, 185), (33, 104), (34, 237), (35, 244),
    (36, 222), (37, 212), (38, 9), (39, 254), (40, 230), (41, 28), (42, 28), (43, 132),
    (44, 221), (45, 232), (46, 11), (47, 153), (48, 41), (49, 39), (50, 78), (51, 196),
    (54, 15), (55, 3), (61, 167), (62, 183), (63, 119), (64, 191), (65, 118), (66, 148),
    (67, 21), (69, 243), (70, 124), (73, 38), (74, 20), (75, 158), (76, 152), (77, 143),
    (80, 14), (81, 106), (82, 49), (83, 22), (84, 143), (85, 140), (86, 5), (87, 150),
    (89, 231), (90, 183), (91, 63), (92, 54), (93, 47), (100, 175), (101, 102), (102, 158),
    (103, 208), (104, 56), (105, 93), (106, 138), (107, 108), (108, 32), (109, 185),
    (110, 84), (111, 34), (112, 174), (113, 124), (114, 237), (115, 4), (116, 76),
    (117, 128), (118, 56), (119, 116), (120, 134), (121, 237), (122, 203), (123, 250),
    (124, 87), (125, 203), (126, 220), (127, 25), (128, 226), (129, 46), (130, 29),
    (131, 223), (132, 85), (133, 6), (134, 229), (135, 203), (136, 1), (137, 195),
    (138, 109), (139, 168), (140, 181), (141, 47), (142, 72), (143, 131), (144, 127),
    (146, 103), (147, 154), (148, 178), (149, 200), (150, 134), (151, 219), (152, 208),
    (153, 188), (154, 84), (155, 22), (156, 19), (157, 21), (158, 134), (160, 78),
    (161, 68), (162, 189), (163, 127), (164, 154), (165, 21), (166, 21), (167, 144),
    (168, 1), (169, 234), (170, 73), (171, 181), (172, 22), (173, 83), (174, 167),
    (175, 138), (176, 234), (177, 240), (178, 47), (179, 189), (180, 52), (181, 174),
    (182, 229), (183, 85), (184, 159), (185, 186), (186, 72), (191, 92), (192, 36),
    (193, 71), (194, 98), (195, 120), (200, 134), (201, 205), (214, 69), (215, 101),
    (216, 50), (217, 202), (218, 17), (219, 162), (225, 208), (226, 207), (230, 163),
    (231, 105), (232, 151), (233, 35), (234, 150), (235, 179), (241, 90), (242, 104),
    (243, 85), (244, 95), (245, 130), (246, 184), (247, 81), (248, 8), (249, 204),
    (250, 49), (251, 170), (252, 44), (253, 83), (254, 46),
    // common, MAVLink 2 only
    (256, 71), (257, 131), (258, 187), (259, 92), (260, 146), (261, 179), (262, 12),
    (263, 133), (264, 49), (265, 26), (266, 193), (267, 35), (268, 14), (269, 109),
    (270, 59), (271, 22), (275, 126), (276, 18), (280, 70), (281, 48), (282, 123),
    (283, 74), (284, 99), (285, 137), (286, 210), (287, 1), (288, 20), (290, 251),
    (291, 10), (299, 19), (300, 217), (301, 243), (310, 28), (311, 95), (320, 243),
    (321, 88), (322, 243), (323, 78), (324, 132), (330, 23), (331, 91), (332, 236),
    (333, 231), (334, 72), (335, 225), (339, 199), (340, 99), (350, 232), (360, 11),
    (370, 75), (373, 117), (375, 251), (380, 232), (385, 147), (386, 132), (387, 4),
    (388, 8), (390, 156), (397, 182), (400, 110), (401, 183), (410, 160), (411, 106),
    (412, 33), (413, 77),
    // ardupilotmega and its includes
    (9000, 113), (9005, 117), (10001, 209), (10002, 186), (10003, 4), (10004, 133),
    (10005, 103), (10006, 193), (10007, 71), (10008, 240), (10009, 136), (11000, 134),
    (11001, 15), (11002, 234), (11003, 64), (11010, 46), (11011, 106), (11020, 205),
    (11030, 144), (11031, 133), (11032, 85), (11033, 195), (11034, 79), (11035, 128),
    (11036, 177), (11037, 130), (11038, 47), (11039, 142), (12900, 114), (12901, 254),
    (12902, 140), (12903, 249), (12904, 77), (12905, 49), (42000, 227), (42001, 239),
];

/// CRC_EXTRA for a message id of the common and ardupilotmega dialects.
///
/// Frames carrying an id outside the table cannot be checked and are
/// treated as corrupt by the decoder.
pub fn crc_extra(message_id: u32) -> Option<u8> {
    CRC_EXTRA
        .binary_search_by_key(&message_id, |&(id, _)| id)
        .ok()
        .map(|index| CRC_EXTRA[index].1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        // CRC-16/MCRF4XX check value
        let mut crc = X25::new();
        crc.update(b"123456789");
        assert_eq!(crc.value(), 0x6F91);
    }

    #[test]
    fn test_incremental_matches_single_pass() {
        let data = [0x09u8, 0x00, 0x00, 0x00, 0x07, 0x01, 0x01, 0x00];
        let mut split = X25::new();
        split.update(&data[..3]);
        split.update(&data[3..]);
        let mut whole = X25::new();
        whole.update(&data);
        assert_eq!(split, whole);
    }

    #[test]
    fn test_crc_extra_lookup() {
        assert_eq!(crc_extra(0), Some(50));
        assert_eq!(crc_extra(111), Some(34));
        assert_eq!(crc_extra(66), Some(148));
        assert_eq!(crc_extra(9_999_999), None);
    }

    #[test]
    fn test_dialect_messages_have_extra() {
        assert_eq!(crc_extra(162), Some(189)); // FENCE_STATUS
        assert_eq!(crc_extra(124), Some(87)); // GPS2_RAW
        assert_eq!(crc_extra(132), Some(85)); // DISTANCE_SENSOR
        assert_eq!(crc_extra(148), Some(178)); // AUTOPILOT_VERSION
        assert_eq!(crc_extra(245), Some(130)); // EXTENDED_SYS_STATE
        assert_eq!(crc_extra(11030), Some(144)); // ESC_TELEMETRY_1_TO_4
        assert_eq!(crc_extra(11039), Some(142)); // MCU_STATUS
        assert_eq!(crc_extra(3), None);
    }

    #[test]
    fn test_table_sorted_by_id() {
        assert!(CRC_EXTRA.windows(2).all(|pair| pair[0].0 < pair[1].0));
    }

    #[test]
    fn test_extra_changes_checksum() {
        let body = [1u8, 2, 3];
        assert_ne!(frame_checksum(&body, 50), frame_checksum(&body, 34));
    }
}
