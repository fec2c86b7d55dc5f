#[cfg(test)]
mod tests {
    use kmersearch::kmersearch::errors::EngineError;
    use kmersearch::kmersearch::seq::*;

    /* --------------------------------------------------------------------- */
    /*  encode / decode round-trips                                          */
    /* --------------------------------------------------------------------- */

    #[test]
    fn dna2_roundtrip() {
        for s in ["ACGT", "A", "TTTTTTTT", "GATTACA", "ACGTACGTACGTACGTACGT"] {
            let packed = encode(Alphabet::Dna2, s).unwrap();
            assert_eq!(decode(&packed).unwrap(), s);
            assert_eq!(packed.symbol_len(), s.len());
            assert_eq!(packed.bit_len(), s.len() * 2);
        }
    }

    #[test]
    fn dna4_roundtrip() {
        for s in ["ACGT", "MRWSYKVHDBN", "NNNN", "ARAA", "GATTACA"] {
            let packed = encode(Alphabet::Dna4, s).unwrap();
            assert_eq!(decode(&packed).unwrap(), s);
            assert_eq!(packed.symbol_len(), s.len());
            assert_eq!(packed.bit_len(), s.len() * 4);
        }
    }

    #[test]
    fn lowercase_and_u_fold() {
        let lower = encode(Alphabet::Dna2, "acgu").unwrap();
        let upper = encode(Alphabet::Dna2, "ACGT").unwrap();
        assert_eq!(lower, upper);
        assert_eq!(decode(&lower).unwrap(), "ACGT");

        // U also folds into T in DNA4
        let ru = encode(Alphabet::Dna4, "u").unwrap();
        let rt = encode(Alphabet::Dna4, "T").unwrap();
        assert_eq!(ru, rt);
    }

    /* --------------------------------------------------------------------- */
    /*  bit layout                                                           */
    /* --------------------------------------------------------------------- */

    #[test]
    fn dna2_packs_msb_first() {
        // A=00 C=01 G=10 T=11, first base in the top bit pair
        let packed = encode(Alphabet::Dna2, "ACGT").unwrap();
        assert_eq!(packed.as_bytes(), &[0b00_01_10_11]);

        // Partial final byte keeps its tail bits zero
        let packed = encode(Alphabet::Dna2, "TTT").unwrap();
        assert_eq!(packed.as_bytes(), &[0b11_11_11_00]);
        assert_eq!(packed.bit_len(), 6);
    }

    #[test]
    fn dna4_packs_msb_first() {
        // A=0001 C=0010; N=1111
        let packed = encode(Alphabet::Dna4, "AC").unwrap();
        assert_eq!(packed.as_bytes(), &[0b0001_0010]);
        let packed = encode(Alphabet::Dna4, "N").unwrap();
        assert_eq!(packed.as_bytes(), &[0b1111_0000]);
    }

    #[test]
    fn code_accessors_match_layout() {
        let packed = encode(Alphabet::Dna2, "ACGT").unwrap();
        assert_eq!(
            (0..4).map(|i| packed.code2(i)).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
        let packed = encode(Alphabet::Dna4, "ACGTN").unwrap();
        assert_eq!(
            (0..5).map(|i| packed.code4(i)).collect::<Vec<_>>(),
            vec![0b0001, 0b0010, 0b0100, 0b1000, 0b1111]
        );
    }

    /* --------------------------------------------------------------------- */
    /*  validation                                                           */
    /* --------------------------------------------------------------------- */

    #[test]
    fn dna2_rejects_degenerates_and_junk() {
        for (text, bad_pos) in [("ACGN", 3), ("XACG", 0), ("AC GT", 2), ("ACGR", 3)] {
            match encode(Alphabet::Dna2, text) {
                Err(EngineError::InvalidCharacter { position, .. }) => {
                    assert_eq!(position, bad_pos, "wrong position for {:?}", text)
                }
                other => panic!("expected InvalidCharacter for {:?}, got {:?}", text, other.err()),
            }
        }
    }

    #[test]
    fn dna4_rejects_non_iupac() {
        assert!(encode(Alphabet::Dna4, "ACGTN").is_ok());
        assert!(matches!(
            encode(Alphabet::Dna4, "ACGTZ"),
            Err(EngineError::InvalidCharacter { position: 4, .. })
        ));
    }

    #[test]
    fn vector_and_scalar_validation_agree() {
        // Long enough to exercise the 16-byte chunks plus the tail
        let clean = "ACGTACGTACGTACGTACGTacgtacgtUuTT";
        assert_eq!(find_invalid(Alphabet::Dna2, clean.as_bytes()), None);
        assert_eq!(find_invalid_dna2_scalar(clean.as_bytes()), None);

        for bad_pos in [0usize, 7, 15, 16, 17, 30, 31] {
            let mut bytes = clean.as_bytes().to_vec();
            bytes[bad_pos] = b'N';
            assert_eq!(
                find_invalid(Alphabet::Dna2, &bytes),
                Some(bad_pos),
                "dispatch path at {}",
                bad_pos
            );
            assert_eq!(
                find_invalid_dna2_scalar(&bytes),
                Some(bad_pos),
                "scalar path at {}",
                bad_pos
            );
        }
    }

    /* --------------------------------------------------------------------- */
    /*  equality and ordering                                                */
    /* --------------------------------------------------------------------- */

    #[test]
    fn alphabets_never_compare_equal() {
        // Same bases, different representation
        let two = encode(Alphabet::Dna2, "ACGT").unwrap();
        let four = encode(Alphabet::Dna4, "ACGT").unwrap();
        assert_ne!(two, four);
    }

    #[test]
    fn ordering_is_over_raw_bits() {
        let a = encode(Alphabet::Dna2, "AAAA").unwrap();
        let t = encode(Alphabet::Dna2, "TTTT").unwrap();
        assert!(a < t);

        // Prefix sorts before its extension
        let short = encode(Alphabet::Dna2, "ACGT").unwrap();
        let long = encode(Alphabet::Dna2, "ACGTA").unwrap();
        assert!(short < long);
    }

    #[test]
    fn detect_narrowest_alphabet() {
        assert_eq!(Alphabet::for_text("ACGTU"), Alphabet::Dna2);
        assert_eq!(Alphabet::for_text("ACGTN"), Alphabet::Dna4);
        assert_eq!(Alphabet::for_text("ARAA"), Alphabet::Dna4);
        // Junk falls through to DNA4 and fails there at encode time
        assert_eq!(Alphabet::for_text("AXGT"), Alphabet::Dna4);
    }

    /* --------------------------------------------------------------------- */
    /*  raw construction                                                     */
    /* --------------------------------------------------------------------- */

    #[test]
    fn from_raw_checks_invariants() {
        // bit length not a multiple of the width
        assert!(PackedSeq::from_raw(vec![0], 3, Alphabet::Dna2).is_err());
        // wrong byte count
        assert!(PackedSeq::from_raw(vec![0, 0], 4, Alphabet::Dna2).is_err());
        // dirty tail bits
        assert!(PackedSeq::from_raw(vec![0b0000_0001], 4, Alphabet::Dna2).is_err());

        let ok = PackedSeq::from_raw(vec![0b00_01_10_11], 8, Alphabet::Dna2).unwrap();
        assert_eq!(decode(&ok).unwrap(), "ACGT");
    }

    #[test]
    fn decode_rejects_empty_base_set() {
        // 0000 nibble cannot come from the encoder
        let corrupt = PackedSeq::from_raw(vec![0b0000_0000], 4, Alphabet::Dna4).unwrap();
        assert!(decode(&corrupt).is_err());
    }
}
