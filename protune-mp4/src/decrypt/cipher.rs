use crate::{Error, Result, extract::Subsample, scheme::SchemeType};
use aes::{
    Aes128,
    cipher::{BlockDecrypt, KeyInit, KeyIvInit, StreamCipher, generic_array::GenericArray},
};

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// Zero pad (on the right) an 8 or 16 byte iv to a full counter/iv block.
pub fn pad_iv(iv: &[u8]) -> [u8; 16] {
    let mut block = [0; 16];
    let len = iv.len().min(16);
    block[..len].copy_from_slice(&iv[..len]);
    block
}

/// Decrypt one sample in place.
///
/// `cenc` keeps one counter running over every encrypted span of the sample.
/// `cbcs` gathers the encrypted spans, decrypts them as one CBC stream and
/// scatters the result back. In both cases only whole blocks of that stream
/// are touched by CBC, a trailing partial block stays as is.
pub fn decrypt_sample(
    scheme_type: SchemeType,
    key: &[u8; 16],
    iv: &[u8; 16],
    data: &mut [u8],
    subsamples: &[Subsample],
) -> Result<()> {
    let covered = subsamples
        .iter()
        .map(|x| x.clear as u64 + x.cipher as u64)
        .sum::<u64>();

    if covered > data.len() as u64 {
        return Err(Error::format(format!(
            "subsamples cover {} bytes but the sample only has {}",
            covered,
            data.len()
        )));
    }

    match scheme_type {
        SchemeType::Cenc => {
            let mut cipher =
                Aes128Ctr::new(GenericArray::from_slice(key), GenericArray::from_slice(iv));

            if subsamples.is_empty() {
                cipher.apply_keystream(data);
            } else {
                for (start, end) in encrypted_spans(subsamples) {
                    cipher.apply_keystream(&mut data[start..end]);
                }
            }
        }

        SchemeType::Cbcs => {
            if subsamples.is_empty() {
                cbc_decrypt_aligned(key, iv, data);
            } else {
                let spans = encrypted_spans(subsamples).collect::<Vec<_>>();
                let mut stream = Vec::with_capacity(spans.iter().map(|(s, e)| e - s).sum());

                for (start, end) in &spans {
                    stream.extend_from_slice(&data[*start..*end]);
                }

                cbc_decrypt_aligned(key, iv, &mut stream);

                let mut at = 0;
                for (start, end) in spans {
                    data[start..end].copy_from_slice(&stream[at..at + end - start]);
                    at += end - start;
                }
            }
        }
    }

    Ok(())
}

/// Absolute ranges of the encrypted runs.
fn encrypted_spans(subsamples: &[Subsample]) -> impl Iterator<Item = (usize, usize)> + '_ {
    subsamples.iter().scan(0usize, |offset, x| {
        let start = *offset + x.clear as usize;
        let end = start + x.cipher as usize;
        *offset = end;
        Some((start, end))
    })
}

/// CBC decrypt the largest 16 byte aligned prefix of `data`.
fn cbc_decrypt_aligned(key: &[u8; 16], iv: &[u8; 16], data: &mut [u8]) {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut prev = *iv;

    for chunk in data.chunks_exact_mut(16) {
        let mut ciphertext = [0; 16];
        ciphertext.copy_from_slice(chunk);
        cipher.decrypt_block(GenericArray::from_mut_slice(chunk));

        for (x, y) in chunk.iter_mut().zip(prev) {
            *x ^= y;
        }

        prev = ciphertext;
    }
}
