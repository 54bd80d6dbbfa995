//! Server half of the key exchange, for mock gateway servers in tests.
//!
//! A real deployment never links this module: the universe private key is a
//! server-side secret. Mock servers use it to decrypt the client's offered
//! session key and answer with a verdict, which is all the integration
//! suites need to exercise the full encrypted path.

use base64::Engine;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Oaep, RsaPrivateKey};
use sha2::Sha256;

use tether_core::message::RESULT_OK;
use tether_core::{Message, MsgKind, ProtocolError};

use crate::channel::{ChannelCipher, SessionKey, SESSION_KEY_LEN};
use crate::handshake::{encode_result_body, parse_request_body, HandshakeError, NONCE_MATERIAL_LEN};

/// Private half of the embedded universe key (test deployments only).
const UNIVERSE_PRIVATE_KEY_B64: &str = "\
MIIEvQIBADANBgkqhkiG9w0BAQEFAASCBKcwggSjAgEAAoIBAQC6foJIhNoy1pVaOqxqeXIh\
25qE9sAk3InmTY/2uQajTOrl71oGIVYHaHlS7J4vRUuQgcQoiCr13ouA+r6f8s3Xb3HtvaM/\
o/1pX55i6NjKRXqKClWvE9RVSjtcheXFzFR7hjMqnfKkePKKrNl8uFNK1ZCHU/1kPBxxWnIi\
aE0zMo59PSpDsddoImzo4CDZgEM4Xd0O49mqcInkxDj6BjVRanbcQcevPUta9rtCDsESuySh\
eMzUia9dxNHdnCR0j32QXuEqfbVirPWGo6KU3emGsfVU4nE++CBa1SyNsgHSyzv5xT0tC0b4\
gipYprM1gkBAmzsBKG2w6IfUAKra3XZVAgMBAAECggEAGtc42IeYYN895RvTM0rR2Joi4dai\
nluIVFde7C9Ci4+3MgsyDXZQS6Ynaf4ooRyLzNtEWGIKrtLOCKzt8RbQtdwyDTmxLGhlgTw0\
Dz+8bdY0lff5T4ae1Xym0QDraj2nfhS5Of28DZxjqf5JGfhscnWMxNFbg4jcPhs6mIWi8MZr\
x/d6BXUxaajUV/C63W31L73oafYmbiIpMLFwbc3ByLOO8TtO9wNYPmJcSsb68q7+fHIx7Hwt\
daWdUWkk3k6qDWuXoVjGRL9qYh3e3C+DiI3E+8EzesZOvAaj1bLMXvUmYTi6IRVSPLJ6AzqG\
J8pSmJvKlrwynn1xk7MYJHyPiQKBgQDisIOoeflzOyZsxHnMEzugeKk6aN9QRxIGIocBCPtj\
vI/EJCCuE/Bt5ipJTjU8oArG10cBiPy02b34S+Ml3r1fkODl1gGnx+U/ck/gssL/5qMjTBOM\
ZnYehSW7c8BRPXGIgMoOgM/ZqGCcqDVCvJyEhOm/BsWmKtFWN6qlgDv8+QKBgQDSm4SW257l\
W2HK4mXVlniRFpg/nWRXHY9taz+7hxsuqZLpyzyKe9sai1RcsoxJ3dz8/I5t/IwouJw8B28R\
jt1yDtYdH0OJK3vXjo5lXXUP4OclbJttqe7ZTCbu+oLkUFgR+xQMJdvXbvwIQIiGnhTAVCIk\
Ex318zWAaRUf3JpnPQKBgBdRGqm4qhzdJ62mY/TGwapW3ulAIkAqn0L8SDCmEN2IZq1BHg9p\
w6A6PX0+yyEKQTGEsSwKQBwGDZE9lQavK4Fp8IgThCYS3JSzGF4/ZOlXes5Fo/kcDOhEv8XR\
OSXiEQx+Wso1G6wCsrVKY/gSWHMVDMn2U1wtKU0Z+rZ9Qy5ZAoGBALD+W9aAabAtNSlRTO3M\
UDT2vSqxNlN0F0aInH4YFEMJ5dqvn4hugHt1Xoes0fN+DitagMR0OsI6K6rTQIeL/hTN3SmK\
TbKopaJJPuh3O1sF0pwEAzeNWZqqwgmS5I/F6c3qqTVwV6pcrlitC0++6Ied7TdODZ7WLz9k\
kIk/V0+tAoGAJltbdM6kxzBc331w+rAWpjZjOGR+90eVpwDteMmROa6rOWwPkSJtYHawZyHZ\
MOxuZWAoAzXhH9OAxwt3i7MgJCs/o2/VA37vkDMBXgibLKI3lUUz5aftn43LBz7YZ6Q+b5L/\
uYnbhc10b3zY1B8lju+qnAW/aMPjO2Cnt7AUL1s=";

/// Outcome of a successful server-side exchange.
#[derive(Debug)]
pub struct AcceptedHandshake {
    /// Cipher matching the one the client derives.
    pub cipher: ChannelCipher,
    /// Verdict message to send back.
    pub result: Message,
}

/// The universe private key paired with the embedded public key.
pub fn universe_private_key() -> RsaPrivateKey {
    let der = base64::engine::general_purpose::STANDARD
        .decode(UNIVERSE_PRIVATE_KEY_B64)
        .expect("embedded private key decodes");
    RsaPrivateKey::from_pkcs8_der(&der).expect("embedded private key parses")
}

/// Accept a handshake request: decrypt the session key, build the verdict.
pub fn accept(request: &Message) -> Result<AcceptedHandshake, HandshakeError> {
    accept_with_key(request, &universe_private_key())
}

/// Accept a handshake request against a specific private key.
pub fn accept_with_key(
    request: &Message,
    private_key: &RsaPrivateKey,
) -> Result<AcceptedHandshake, HandshakeError> {
    if request.kind != MsgKind::HandshakeRequest {
        return Err(ProtocolError::UnexpectedMessage {
            kind: request.kind.as_u32(),
            phase: "key exchange",
        }
        .into());
    }

    let encrypted = parse_request_body(&request.body)?;
    let blob = private_key
        .decrypt(Oaep::new::<Sha256>(), &encrypted)
        .map_err(|e| HandshakeError::KeyExchange(e.to_string()))?;
    if blob.len() != SESSION_KEY_LEN + NONCE_MATERIAL_LEN {
        return Err(HandshakeError::Protocol(ProtocolError::IntegrityFailure));
    }

    let mut key_bytes = [0u8; SESSION_KEY_LEN];
    key_bytes.copy_from_slice(&blob[..SESSION_KEY_LEN]);
    let cipher = ChannelCipher::new(&SessionKey::from_bytes(key_bytes));

    Ok(AcceptedHandshake {
        cipher,
        result: Message::new(MsgKind::HandshakeResult, encode_result_body(RESULT_OK)),
    })
}

/// Build a rejection verdict with the given failure code.
pub fn reject(code: u32) -> Message {
    Message::new(MsgKind::HandshakeResult, encode_result_body(code))
}
