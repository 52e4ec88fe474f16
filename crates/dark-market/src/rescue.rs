//! rescue-style permutation over the scalar field
//!
//! arithmetic-only design (power maps, linear layer, constant addition) so
//! an mpc network can evaluate it on secret-shared inputs.
//!
//! - width 5, alpha = 5 (smallest alpha with gcd(alpha, l-1) = 1)
//! - inverse s-box x^(1/alpha mod l-1)
//! - cauchy mds matrix m[i][j] = 1/(i + 5 + j)
//! - round constants expanded from blake3 xof

use std::sync::OnceLock;

use crate::field::Fe;

/// state width
pub const WIDTH: usize = 5;

/// sponge rate, capacity is WIDTH - RATE
pub const RATE: usize = 4;

/// double rounds (forward + inverse s-box half each)
pub const ROUNDS: usize = 10;

/// 5^-1 mod (l - 1), little-endian u64 limbs
const ALPHA_INV: [u64; 4] = [
    0x01a4_a1dc_9e2d_18c1,
    0xa61f_62b8_c82e_2ae7,
    0x9999_9999_9999_9999,
    0x0999_9999_9999_9999,
];

const CONSTANTS_DOMAIN: &str = "dark-market.rescue.round-constants.v1";

struct Constants {
    mds: [[Fe; WIDTH]; WIDTH],
    round: Vec<[Fe; WIDTH]>,
}

fn constants() -> &'static Constants {
    static CONSTANTS: OnceLock<Constants> = OnceLock::new();
    CONSTANTS.get_or_init(|| {
        let mut mds = [[Fe::ZERO; WIDTH]; WIDTH];
        for (i, row) in mds.iter_mut().enumerate() {
            for (j, m) in row.iter_mut().enumerate() {
                *m = Fe::from((i + WIDTH + j) as u64).invert();
            }
        }

        let mut xof = blake3::Hasher::new_derive_key(CONSTANTS_DOMAIN).finalize_xof();
        let round = (0..2 * ROUNDS)
            .map(|_| {
                let mut rc = [Fe::ZERO; WIDTH];
                for c in rc.iter_mut() {
                    let mut wide = [0u8; 64];
                    xof.fill(&mut wide);
                    *c = Fe::from_bytes_wide(&wide);
                }
                rc
            })
            .collect();

        Constants { mds, round }
    })
}

fn linear_layer(state: &mut [Fe; WIDTH], mds: &[[Fe; WIDTH]; WIDTH], rc: &[Fe; WIDTH]) {
    let mut out = *rc;
    for (o, row) in out.iter_mut().zip(mds.iter()) {
        for (m, x) in row.iter().zip(state.iter()) {
            *o += *m * *x;
        }
    }
    *state = out;
}

/// apply the permutation in place
pub fn permute(state: &mut [Fe; WIDTH]) {
    let c = constants();
    for r in 0..ROUNDS {
        for x in state.iter_mut() {
            *x = x.pow5();
        }
        linear_layer(state, &c.mds, &c.round[2 * r]);

        for x in state.iter_mut() {
            *x = x.pow_limbs(&ALPHA_INV);
        }
        linear_layer(state, &c.mds, &c.round[2 * r + 1]);
    }
}

/// sponge hash, output is one full state
///
/// capacity lane is initialised with the input length; input is padded
/// with a single one followed by zeros to a multiple of RATE.
pub fn hash(input: &[Fe]) -> [Fe; WIDTH] {
    let mut state = [Fe::ZERO; WIDTH];
    state[RATE] = Fe::from(input.len() as u64);

    let mut padded = input.to_vec();
    padded.push(Fe::ONE);
    while padded.len() % RATE != 0 {
        padded.push(Fe::ZERO);
    }

    for chunk in padded.chunks(RATE) {
        for (s, x) in state.iter_mut().zip(chunk) {
            *s += *x;
        }
        permute(&mut state);
    }

    let mut out = [Fe::ZERO; WIDTH];
    out[..RATE].copy_from_slice(&state[..RATE]);
    permute(&mut state);
    out[RATE] = state[0];
    out
}
